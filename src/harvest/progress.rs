use std::{io::IsTerminal, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;

/// The progress channels of a single entity pipeline
pub struct EntityProgress {
    label: &'static str,
    ticks: flume::Receiver<()>,
    total: flume::Receiver<u64>,
}

impl EntityProgress {
    pub fn new(label: &'static str, ticks: flume::Receiver<()>, total: flume::Receiver<u64>) -> Self {
        Self { label, ticks, total }
    }
}

/// Displays the progress of every pipeline until they're done, exiting silently when cancelled.
///
/// The channels are always drained, even when the progress is not displayed.
pub async fn report(token: CancellationToken, show: bool, entities: [EntityProgress; 3]) {
    let target = if show && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let multi = MultiProgress::with_draw_target(target);
    let style = ProgressStyle::with_template("{spinner:.blue} {prefix:>15.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    let [tags, issues, merge_requests] = entities.map(|entity| {
        let bar = multi.add(ProgressBar::no_length().with_style(style.clone()));
        bar.set_prefix(entity.label);
        bar.enable_steady_tick(Duration::from_millis(100));
        (bar, entity)
    });

    tokio::join!(
        track(&token, tags.0, tags.1),
        track(&token, issues.0, issues.1),
        track(&token, merge_requests.0, merge_requests.1),
    );
}

/// Updates the bar with the progress of a single pipeline
async fn track(token: &CancellationToken, bar: ProgressBar, entity: EntityProgress) {
    let (mut ticks_done, mut total_done) = (false, false);
    while !(ticks_done && total_done) {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                bar.abandon_with_message("cancelled");
                return;
            }
            total = entity.total.recv_async(), if !total_done => match total {
                Ok(total) => bar.set_length(total),
                Err(_) => total_done = true,
            },
            tick = entity.ticks.recv_async(), if !ticks_done => match tick {
                Ok(()) => bar.inc(1),
                Err(_) => ticks_done = true,
            },
        }
    }
    bar.finish_with_message("done");
    tracing::trace!("{} processed: {}", entity.label, bar.position());
}
