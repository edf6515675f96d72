use std::{path::Path, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{Process, ProcessOutput};
use crate::{
    cli::{GenerateProcess, Provider},
    config::Config,
    errors::{AppError, Result, UserFacingError},
    format_error, format_msg,
    harvest::harvest,
    release::build_releases,
    render::render_markdown,
    source::{GithubSource, GitlabSource, Source},
    utils::read_env_token,
};

/// Output path meaning the standard output
const STDOUT: &str = "-";

impl Process for GenerateProcess {
    #[instrument(skip_all)]
    async fn execute(
        self,
        mut config: Config,
        cancellation_token: CancellationToken,
    ) -> color_eyre::Result<ProcessOutput> {
        // Apply command line overrides
        if let Some(timeout) = self.timeout {
            config.fetch.timeout = timeout;
        }
        if let Some(workers) = self.workers {
            config.fetch.workers = usize::from(workers);
        }

        let res = match self.provider {
            Provider::Github => {
                let token = read_env_token(&config.github.token_env);
                match GithubSource::new(&config.github, &self.repository, token) {
                    Ok(source) => self.generate(Arc::new(source), &config, cancellation_token).await,
                    Err(err) => Err(err),
                }
            }
            Provider::Gitlab => {
                let token = read_env_token(&config.gitlab.token_env);
                match GitlabSource::new(&config.gitlab, &self.repository, token) {
                    Ok(source) => self.generate(Arc::new(source), &config, cancellation_token).await,
                    Err(err) => Err(err),
                }
            }
        };

        match res {
            Ok(output) => Ok(output),
            Err(AppError::UserFacing(err)) => Ok(ProcessOutput::fail().stderr(format_error!("{err}"))),
            Err(AppError::Unexpected(report)) => Err(report),
        }
    }
}

impl GenerateProcess {
    /// Generates the changelog of the project hosted on the given source
    async fn generate<S>(&self, source: Arc<S>, config: &Config, token: CancellationToken) -> Result<ProcessOutput>
    where
        S: Source + Send + 'static,
    {
        let project = source.project().to_owned();
        tracing::info!("Generating changelog for {project}");

        let exists = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(UserFacingError::Cancelled.into()),
            res = source.project_exists() => res.map_err(|err| err.in_query("ProjectExists"))?,
        };
        if !exists {
            return Err(UserFacingError::ProjectNotFound(project).into());
        }

        let options = config.harvest_options(self.new_release.clone(), !self.quiet)?;
        let history = harvest(source, &options, token).await?;
        let releases = build_releases(history);
        let changelog = render_markdown(&project, &releases);

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| config.output.path.to_string_lossy().into_owned());
        if output == STDOUT {
            return Ok(ProcessOutput::success().stdout(changelog));
        }

        let path = Path::new(&output);
        if let Err(err) = tokio::fs::write(path, changelog).await {
            tracing::error!("Couldn't write {}: {err}", path.display());
            return Err(UserFacingError::OutputNotWritable(path.display().to_string()).into());
        }
        Ok(ProcessOutput::success().stderr(format_msg!(
            "Changelog with {} releases written to {}",
            releases.len(),
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::memory::{Listing, MemorySource, change, issue, tag};

    fn process(output: Option<String>) -> GenerateProcess {
        GenerateProcess {
            repository: String::from("owner/project"),
            provider: Provider::Github,
            new_release: None,
            output,
            quiet: true,
            timeout: None,
            workers: None,
        }
    }

    fn source() -> MemorySource {
        MemorySource {
            tags: vec![tag("v1.0.0", 100), tag("v1.1.0", 300)],
            issues: vec![issue(1, 50), issue(2, 200), issue(3, 400)],
            changes: vec![change(10, 250)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_to_stdout() {
        let output = process(Some(String::from("-")))
            .generate(Arc::new(source()), &Config::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.failed);
        let changelog = output.stdout.unwrap();
        assert!(changelog.starts_with("# Changelog of owner/project\n"));
        let v110 = changelog.find("## [v1.1.0]").unwrap();
        let v100 = changelog.find("## [v1.0.0]").unwrap();
        assert!(v110 < v100);
        assert!(changelog.contains("- Issue 2 [#2](https://example.com/owner/project/issues/2)"));
        assert!(!changelog.contains("Issue 3"));
    }

    #[tokio::test]
    async fn test_generate_with_new_release() {
        let mut process = process(Some(String::from("-")));
        process.new_release = Some(String::from("v2.0.0"));

        let output = process
            .generate(Arc::new(source()), &Config::default(), CancellationToken::new())
            .await
            .unwrap();

        let changelog = output.stdout.unwrap();
        let v200 = changelog.find("## [v2.0.0]").unwrap();
        let issue3 = changelog.find("Issue 3").unwrap();
        let v110 = changelog.find("## [v1.1.0]").unwrap();
        assert!(v200 < issue3 && issue3 < v110);
    }

    #[tokio::test]
    async fn test_generate_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CHANGELOG.md");

        let output = process(Some(path.to_string_lossy().into_owned()))
            .generate(Arc::new(source()), &Config::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.failed);
        assert_eq!(output.stdout, None);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("## [v1.0.0]"));
    }

    #[tokio::test]
    async fn test_generate_project_not_found() {
        let source = Arc::new(MemorySource {
            missing: true,
            ..source()
        });

        let err = process(None)
            .generate(Arc::clone(&source), &Config::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.user_facing(),
            Some(&UserFacingError::ProjectNotFound(String::from("owner/project")))
        );
        assert_eq!(source.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_generate_reports_failing_query() {
        let source = Arc::new(source().failing(Listing::Changes, 1));

        let err = process(Some(String::from("-")))
            .generate(source, &Config::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "ListMergedChangesPage failed: Request failed: page 1 is broken"
        );
    }

    #[tokio::test]
    async fn test_generate_unwritable_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("CHANGELOG.md");

        let err = process(Some(path.to_string_lossy().into_owned()))
            .generate(Arc::new(source()), &Config::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.user_facing(), Some(UserFacingError::OutputNotWritable(_))));
    }
}
