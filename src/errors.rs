use std::{
    env, fmt,
    panic::{self, UnwindSafe},
    path::{Path, PathBuf},
    process,
    time::Duration,
};

use color_eyre::{Report, Section, config::HookBuilder, owo_colors::style};
use futures_util::FutureExt;
use tokio::sync::mpsc;

/// Builds the section displayed along with panic reports
fn panic_section(log_path: Option<&Path>) -> String {
    if let Some(log_path) = log_path {
        format!(
            "This is a bug. Consider reporting it at {}\nLogs can be found at {}",
            env!("CARGO_PKG_REPOSITORY"),
            log_path.display()
        )
    } else {
        format!(
            "This is a bug. Consider reporting it at {}\nLogs were not generated, consider enabling them on the \
             config or running with LEDGER_LOG=debug.",
            env!("CARGO_PKG_REPOSITORY")
        )
    }
}

/// Initializes error and panics handling
pub async fn init<F>(log_path: Option<PathBuf>, fut: F) -> color_eyre::Result<()>
where
    F: Future<Output = color_eyre::Result<()>> + UnwindSafe,
{
    tracing::trace!("Initializing error handlers");
    // Initialize hooks
    let panic_section = panic_section(log_path.as_deref());
    let (panic_hook, eyre_hook) = HookBuilder::default()
        .panic_section(panic_section.clone())
        .display_env_section(false)
        .display_location_section(true)
        .capture_span_trace_by_default(true)
        .into_hooks();

    // Initialize panic notifier
    let (panic_tx, mut panic_rx) = mpsc::channel(1);

    // Install both hooks
    eyre_hook.install()?;
    panic::set_hook(Box::new(move |panic_info| {
        // Progress bars might be drawing on stderr, so the report is handed over once the main future is dropped
        let panic_report = panic_hook.panic_report(panic_info).to_string();
        tracing::error!("Error: {}", strip_ansi_escapes::strip_str(&panic_report));
        if panic_tx.try_send(panic_report).is_err() {
            tracing::error!("Error sending panic report");
            process::exit(2);
        }
    }));

    tokio::select! {
        biased;
        // Wait for a panic to be notified
        panic_report = panic_rx.recv().fuse() => {
            if let Some(report) = panic_report {
                eprintln!("{report}");
            } else {
                eprintln!(
                    "{}\n\n{panic_section}",
                    style().bright_red().style("A panic occurred, but the detailed report could not be captured.")
                );
                tracing::error!("A panic occurred, but the detailed report could not be captured.");
            }
            process::exit(1);
        }
        // Or for the main future to finish, catching unwinding panics
        res = Box::pin(fut).catch_unwind() => {
            match res {
                Ok(r) => r
                    .with_section(move || panic_section)
                    .inspect_err(|err| tracing::error!("Error: {}", strip_ansi_escapes::strip_str(format!("{err:?}")))),
                Err(err) => {
                    if let Ok(report) = panic_rx.try_recv() {
                        eprintln!("{report}");
                    } else if let Some(err) = err.downcast_ref::<&str>() {
                        print_panic_msg(err, panic_section);
                    } else if let Some(err) = err.downcast_ref::<String>() {
                        print_panic_msg(err, panic_section);
                    } else {
                        eprintln!(
                            "{}\n\n{panic_section}",
                            style().bright_red().style("An unexpected panic happened")
                        );
                        tracing::error!("An unexpected panic happened");
                    }
                    process::exit(1);
                }
            }
        }
    }
}

fn print_panic_msg(err: impl AsRef<str>, panic_section: String) {
    let err = err.as_ref();
    eprintln!(
        "{}\nMessage: {}\n\n{panic_section}",
        style().bright_red().style("The application panicked (crashed)."),
        style().blue().style(err)
    );
    tracing::error!("Panic: {err}");
}

/// Result alias with [AppError] as the default error
pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// Top-level error of the application
#[derive(Debug)]
pub enum AppError {
    /// An expected failure, meant to be displayed to the user
    UserFacing(UserFacingError),
    /// An unexpected error, most likely a bug
    Unexpected(Report),
}

/// Failures the user can act upon
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserFacingError {
    /// The operation was cancelled before it could complete
    #[error("Operation cancelled")]
    Cancelled,
    /// The overall deadline expired before every page was retrieved
    #[error("Deadline of {0:?} exceeded while retrieving the project history")]
    DeadlineExceeded(Duration),
    /// The remote API could not be reached or rejected the request
    #[error("Request failed: {0}")]
    ApiRequestFailed(String),
    /// The remote API rejected the credentials
    #[error("Unauthorized, check the token provided")]
    ApiUnauthorized,
    /// The remote API is rate limiting us
    #[error("Rate limit reached, try again later or provide a token")]
    ApiRateLimited,
    /// A failure annotated with the name of the query originating it
    #[error("{query} failed: {reason}")]
    QueryFailed {
        query: &'static str,
        reason: Box<UserFacingError>,
    },
    /// The target project doesn't exist or isn't visible
    #[error("Project '{0}' was not found")]
    ProjectNotFound(String),
    /// The repository location couldn't be understood
    #[error("Invalid repository '{0}', expected a path like 'owner/name'")]
    InvalidRepository(String),
    /// The changelog couldn't be written
    #[error("Couldn't write the changelog to {0}")]
    OutputNotWritable(String),
}

impl AppError {
    /// Converts this error into a [Report]
    pub fn into_report(self) -> Report {
        match self {
            AppError::UserFacing(err) => Report::new(err),
            AppError::Unexpected(report) => report,
        }
    }

    /// Annotates the error with the name of the query that produced it.
    ///
    /// Cancellation and deadline errors are left untouched, as they don't originate on the query itself.
    pub fn in_query(self, query: &'static str) -> Self {
        match self {
            AppError::UserFacing(err @ (UserFacingError::Cancelled | UserFacingError::DeadlineExceeded(_))) => {
                AppError::UserFacing(err)
            }
            AppError::UserFacing(err @ UserFacingError::QueryFailed { .. }) => AppError::UserFacing(err),
            AppError::UserFacing(err) => AppError::UserFacing(UserFacingError::QueryFailed {
                query,
                reason: Box::new(err),
            }),
            AppError::Unexpected(report) => AppError::Unexpected(report.wrap_err(format!("{query} failed"))),
        }
    }

    /// Returns the user-facing error, if any
    pub fn user_facing(&self) -> Option<&UserFacingError> {
        match self {
            AppError::UserFacing(err) => Some(err),
            AppError::Unexpected(_) => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UserFacing(err) => write!(f, "{err}"),
            AppError::Unexpected(report) => write!(f, "{report:#}"),
        }
    }
}

impl From<UserFacingError> for AppError {
    fn from(err: UserFacingError) -> Self {
        Self::UserFacing(err)
    }
}

impl From<Report> for AppError {
    fn from(report: Report) -> Self {
        Self::Unexpected(report)
    }
}
