//! Status page.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use argh::FromArgs;
use axum::{Router, extract::State, response::Html, routing::get};
use tokio::sync::Mutex;

use crate::{
    backup::status_batch,
    config::Config,
    descriptor::{ClusterQuery, KubectlQuery},
};

#[derive(FromArgs, PartialEq, Debug)]
/// Serve the status page
#[argh(subcommand, name = "serve")]
pub struct ServeCommand {
    #[argh(option, short = 'c')]
    /// config file
    pub config: Option<String>,
}

impl ServeCommand {
    pub fn run(&self, conf: Config) -> i32 {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("Could not start runtime: {e}");
                return 1;
            }
        };

        match rt.block_on(serve(conf)) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("Server failed: {e}");
                1
            }
        }
    }
}

type Source = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Status report lines, recomputed once they are older than `ttl`.
#[derive(Clone)]
pub struct StatusCache {
    source: Source,
    ttl: Duration,
    cached: Arc<Mutex<Option<(Instant, Vec<String>)>>>,
}

impl StatusCache {
    pub fn new(ttl: Duration, source: impl Fn() -> Vec<String> + Send + Sync + 'static) -> Self {
        Self {
            source: Arc::new(source),
            ttl,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn lines(&self) -> Vec<String> {
        let mut cached = self.cached.lock().await;

        if let Some((at, lines)) = cached.as_ref() {
            if at.elapsed() < self.ttl {
                return lines.clone();
            }
        }

        let source = self.source.clone();
        let lines = match tokio::task::spawn_blocking(move || source()).await {
            Ok(lines) => lines,
            Err(e) => vec![format!("ERROR: status check failed: {e}")],
        };

        *cached = Some((Instant::now(), lines.clone()));
        lines
    }
}

/// Current status lines for the labeled pods of the cluster.
fn status_lines(conf: &Config) -> Vec<String> {
    match KubectlQuery::new(conf).list_workloads() {
        Ok(pods) => status_batch(&pods, conf, SystemTime::now()).lines(),
        Err(e) => {
            log::error!("Status check failed: {e}");
            vec![format!("ERROR: {e}")]
        }
    }
}

pub fn render_page(lines: &[String]) -> String {
    let body: String = lines
        .iter()
        .map(|line| format!("<p>{}</p>", escape(line)))
        .collect();
    format!("<html><body>{body}</body></html>")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn serve(conf: Config) -> std::io::Result<()> {
    let bind = conf.serve.bind.clone();
    let ttl = Duration::from_secs(conf.serve.cache_secs);
    let state = StatusCache::new(ttl, move || status_lines(&conf));

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;

    log::info!("🌱 Server listening on {bind}");
    axum::serve(listener, app).await
}

async fn index(State(cache): State<StatusCache>) -> Html<String> {
    Html(render_page(&cache.lines().await))
}

async fn health() -> Html<&'static str> {
    Html("<html><body>OK</body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn page_wraps_lines() {
        let page = render_page(&[
            "Pod a/b does not have a backup within 24 hours".to_string(),
            "x < y".to_string(),
        ]);
        assert_eq!(
            page,
            "<html><body><p>Pod a/b does not have a backup within 24 hours</p><p>x &lt; y</p></body></html>"
        );
    }

    #[tokio::test]
    async fn report_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = StatusCache::new(Duration::from_secs(3600), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec!["OK: ALL BACKUPS WITHIN 24 HOURS".to_string()]
        });

        assert_eq!(cache.lines().await, vec!["OK: ALL BACKUPS WITHIN 24 HOURS"]);
        cache.lines().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_report_is_recomputed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = StatusCache::new(Duration::ZERO, move || {
            vec![counter.fetch_add(1, Ordering::SeqCst).to_string()]
        });

        assert_eq!(cache.lines().await, vec!["0"]);
        assert_eq!(cache.lines().await, vec!["1"]);
    }
}
