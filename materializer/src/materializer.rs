use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use indicatif::ProgressStyle;
use lazy_static::lazy_static;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, instrument, warn, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blobfetcher::BlobFetcher;
use crate::config::{self, MaterializerConfig};
use crate::download::DownloadTask;
use crate::limiter::ConcurrencyLimiter;
use crate::model::ActionResult;
use crate::path_resolver::PathResolver;
use crate::retry::RetryPolicy;
use crate::symlink::SymlinkStep;
use crate::tree::{PendingTree, Plan};
use crate::{DigestFunction, Error};

lazy_static! {
    pub static ref PB_PROGRESS_STYLE: ProgressStyle = ProgressStyle::with_template(
        "{span_child_prefix} {wide_msg} {bar:10} ({elapsed}) {pos:>7}/{len:7}"
    )
    .expect("invalid progress template");
}

/// Local destinations for the captured stdout and stderr of an action.
/// These are used as-is, they don't go through the [PathResolver].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdStreams {
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// Reconstructs the outputs of remote actions on the local filesystem,
/// fetching their contents from a [BlobFetcher].
#[derive(Clone)]
pub struct Materializer {
    fetcher: Arc<dyn BlobFetcher>,
    config: MaterializerConfig,
}

impl Materializer {
    pub fn new(
        fetcher: Arc<dyn BlobFetcher>,
        config: MaterializerConfig,
    ) -> Result<Self, config::Error> {
        config.validate()?;

        Ok(Self { fetcher, config })
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Starts materializing all outputs of `action_result` at the paths
    /// returned by `resolver`, and returns immediately.
    ///
    /// The returned handle resolves once everything is in place, or with the
    /// first error encountered. Must be called from within a tokio runtime.
    pub fn materialize<R>(&self, action_result: ActionResult, resolver: R) -> MaterializationHandle
    where
        R: PathResolver + 'static,
    {
        self.materialize_with_std_streams(action_result, resolver, StdStreams::default())
    }

    /// Like [Materializer::materialize], additionally writing the captured
    /// stdout and stderr to the given destinations.
    pub fn materialize_with_std_streams<R>(
        &self,
        action_result: ActionResult,
        resolver: R,
        std_streams: StdStreams,
    ) -> MaterializationHandle
    where
        R: PathResolver + 'static,
    {
        let cancel = CancellationToken::new();

        let span = info_span!(
            "materialize",
            indicatif.pb_show = 1,
            execution_root = ?resolver.execution_root(),
            outputs = action_result.num_outputs(),
            exit_code = action_result.exit_code,
        );

        let orchestrator = Orchestrator {
            ctx: Arc::new(JobContext {
                fetcher: self.fetcher.clone(),
                digest_function: self.config.digest_function,
                retry: self.config.retry_policy(),
                cancel: cancel.clone(),
            }),
            limiter: ConcurrencyLimiter::new(self.config.concurrency_limit),
            join_set: JoinSet::new(),
            symlinks: Vec::new(),
            span: span.clone(),
            total: 0,
            placed: 0,
        };

        let join = tokio::spawn(
            async move {
                orchestrator
                    .run(&action_result, &resolver, &std_streams)
                    .await
            }
            .instrument(span),
        );

        MaterializationHandle {
            join,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

/// Materializes `action_result` with the default configuration, and at most
/// `concurrency_limit` concurrent fetches.
pub fn materialize<R>(
    fetcher: Arc<dyn BlobFetcher>,
    action_result: ActionResult,
    resolver: R,
    concurrency_limit: usize,
) -> MaterializationHandle
where
    R: PathResolver + 'static,
{
    Materializer {
        fetcher,
        config: MaterializerConfig {
            concurrency_limit: concurrency_limit.max(1),
            ..Default::default()
        },
    }
    .materialize(action_result, resolver)
}

/// A running materialization.
///
/// Awaiting it yields the outcome. Dropping it cancels the materialization.
pub struct MaterializationHandle {
    join: JoinHandle<Result<(), Error>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl MaterializationHandle {
    /// Requests cancellation. No new work is started, running fetches are
    /// interrupted, and the handle resolves with [Error::Cancelled], unless
    /// it already completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// A token that is cancelled when this materialization gets cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Future for MaterializationHandle {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.join).poll(cx)) {
            Ok(res) => Poll::Ready(res),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

/// Shared by all jobs of a materialization.
struct JobContext {
    fetcher: Arc<dyn BlobFetcher>,
    digest_function: DigestFunction,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

/// A unit of work holding a slot of the concurrency limiter while it runs.
enum Job {
    Download(DownloadTask),
    Tree(PendingTree),
}

enum Outcome {
    Placed,
    Expanded(Plan),
}

impl Job {
    async fn run(self, ctx: Arc<JobContext>) -> Result<Outcome, Error> {
        match self {
            Job::Download(task) => {
                task.run(&*ctx.fetcher, ctx.digest_function, &ctx.retry, &ctx.cancel)
                    .await?;
                Ok(Outcome::Placed)
            }
            Job::Tree(tree) => tree
                .expand(&*ctx.fetcher, ctx.digest_function, &ctx.retry, &ctx.cancel)
                .await
                .map(Outcome::Expanded),
        }
    }
}

struct Orchestrator {
    ctx: Arc<JobContext>,
    limiter: ConcurrencyLimiter<Job>,
    join_set: JoinSet<Result<Outcome, Error>>,
    symlinks: Vec<SymlinkStep>,
    /// Carries the progress bar.
    span: Span,
    total: u64,
    placed: u64,
}

impl Orchestrator {
    async fn run<R>(
        mut self,
        action_result: &ActionResult,
        resolver: &R,
        std_streams: &StdStreams,
    ) -> Result<(), Error>
    where
        R: PathResolver,
    {
        self.span.pb_set_style(&PB_PROGRESS_STYLE);
        self.span.pb_set_message("Materializing outputs");
        self.span.pb_start();

        let res = match Plan::for_action_result(
            action_result,
            resolver,
            std_streams,
            self.ctx.digest_function,
        ) {
            Ok(plan) => self.drive(plan).await,
            Err(e) => Err(e),
        };

        match &res {
            Ok(()) => info!(placed = self.placed, "materialized all outputs"),
            Err(e) => {
                self.ctx.cancel.cancel();
                let dropped = self.limiter.cancel();
                let running = self.join_set.len();

                // Wait for running jobs to observe the cancellation, so
                // nothing gets placed after the handle resolved.
                while self.join_set.join_next().await.is_some() {}

                warn!(err=%e, dropped, running, placed = self.placed, "materialization failed");
            }
        }

        res
    }

    /// Applies the plan, and everything expanded from it, until all jobs
    /// are done or one of them failed. Symlinks are installed last, after
    /// every directory and file is in place.
    async fn drive(&mut self, plan: Plan) -> Result<(), Error> {
        self.apply(plan).await?;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.spawn_ready();

            let res = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Err(Error::Cancelled),
                res = self.join_set.join_next() => match res {
                    Some(res) => res,
                    None => break,
                },
            };

            match res?? {
                Outcome::Placed => self.inc_placed(1),
                Outcome::Expanded(plan) => self.apply(plan).await?,
            }
        }

        self.install_symlinks().await
    }

    /// Creates all symlinks collected from the applied plans.
    async fn install_symlinks(&mut self) -> Result<(), Error> {
        for symlink in std::mem::take(&mut self.symlinks) {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            symlink.create().await?;
            self.inc_placed(1);
        }

        Ok(())
    }

    /// Spawns queued jobs while the limiter has free slots.
    fn spawn_ready(&mut self) {
        while let Some((job, permit)) = self.limiter.next_ready() {
            let ctx = self.ctx.clone();
            self.join_set.spawn(
                async move {
                    let res = job.run(ctx).await;
                    drop(permit);
                    res
                }
                .in_current_span(),
            );
        }
    }

    /// Creates all directories, enqueues the fetches, and sets the symlinks
    /// aside until everything else is done.
    #[instrument(skip_all, fields(
        directories = plan.directories.len(),
        files = plan.downloads.len(),
        symlinks = plan.symlinks.len(),
        trees = plan.trees.len(),
    ), err)]
    async fn apply(&mut self, plan: Plan) -> Result<(), Error> {
        self.total += (plan.downloads.len() + plan.symlinks.len()) as u64;
        self.span.pb_set_length(self.total);

        for directory in &plan.directories {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::fs::create_dir_all(directory)
                .await
                .map_err(|e| Error::local_io(directory, e))?;
        }

        self.symlinks.extend(plan.symlinks);

        for tree in plan.trees {
            self.limiter.submit(Job::Tree(tree));
        }
        for download in plan.downloads {
            self.limiter.submit(Job::Download(download));
        }

        debug!(queued = self.limiter.queued(), "applied plan");
        Ok(())
    }

    fn inc_placed(&mut self, n: u64) {
        self.placed += n;
        self.span.pb_set_position(self.placed);
    }
}
