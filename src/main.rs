use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::Router;
use vision_cluster::config::{Config, IMAGES_BUCKET, RESULTS_BUCKET};
use vision_cluster::describe::{Describe, OllamaClient};
use vision_cluster::dispatch::handlers::{
    handle_health, handle_ingest, handle_process, handle_worker_start, handle_worker_status,
};
use vision_cluster::pool::WorkerPool;
use vision_cluster::queue::handlers::{
    handle_complete, handle_depth, handle_fail, handle_lease, handle_register, handle_release,
    handle_renew,
};
use vision_cluster::queue::protocol::{
    ENDPOINT_COMPLETE, ENDPOINT_DEPTH, ENDPOINT_FAIL, ENDPOINT_LEASE, ENDPOINT_REGISTER,
    ENDPOINT_RELEASE, ENDPOINT_RENEW,
};
use vision_cluster::queue::worker::{WorkerRuntime, WorkerSupervisor};
use vision_cluster::queue::JobQueue;
use vision_cluster::storage::object::{MemoryObjectStore, ObjectStore, S3ObjectStore};
use vision_cluster::storage::partitioner::Partitioner;
use vision_cluster::storage::shard::ShardStore;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Config::from_env()?;

    if config.worker_mode {
        run_worker(config).await
    } else {
        run_server(config).await
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Starting server on port {} ({} partitions, replication {}, {} pool workers)",
        config.port,
        config.num_partitions,
        config.replication_factor,
        config.worker_count
    );

    // 1. Placement layer:
    let partitioner = Partitioner::new(config.num_partitions, config.replication_factor)?;
    let shards = ShardStore::new(partitioner.clone());
    let store = build_object_store(&config).await?;
    ensure_buckets(&store).await?;

    // 2. Execution engines:
    let describer: Arc<dyn Describe> =
        Arc::new(OllamaClient::new(&config.ollama_url, &config.ollama_model));
    let pool = WorkerPool::new(config.worker_count, describer.clone());
    let queue = Arc::new(JobQueue::new(config.num_partitions));
    let supervisor = WorkerSupervisor::new(config.clone(), describer, store.clone());

    // 3. HTTP router:
    let max_body_bytes = std::env::var("MAX_BODY_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(200 * 1024 * 1024);

    let app = Router::new()
        .route("/process", post(handle_process))
        .route("/ingest", post(handle_ingest))
        .route("/health", get(handle_health))
        .route("/worker", post(handle_worker_start).get(handle_worker_status))
        // Queue plane, consumed by worker processes
        .route(ENDPOINT_REGISTER, post(handle_register))
        .route(ENDPOINT_LEASE, post(handle_lease))
        .route(ENDPOINT_RENEW, post(handle_renew))
        .route(ENDPOINT_COMPLETE, post(handle_complete))
        .route(ENDPOINT_FAIL, post(handle_fail))
        .route(ENDPOINT_RELEASE, post(handle_release))
        .route(ENDPOINT_DEPTH, get(handle_depth))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(partitioner))
        .layer(Extension(shards))
        .layer(Extension(store))
        .layer(Extension(pool))
        .layer(Extension(queue))
        .layer(Extension(supervisor));

    // 4. Serve until shutdown:
    let addr = SocketAddr::new(bind_ip(&config.hostname), config.port);
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    if config.worker_partitions.is_empty() {
        anyhow::bail!("WORKER_MODE requires PARTITIONS to be set");
    }

    tracing::info!(
        "Starting worker {} for partitions {:?} against {}",
        config.worker_id,
        config.worker_partitions,
        config.api_endpoint
    );

    let store = build_object_store(&config).await?;
    let describer: Arc<dyn Describe> =
        Arc::new(OllamaClient::new(&config.ollama_url, &config.ollama_model));

    let runtime = WorkerRuntime::new(&config, describer, store);
    runtime.register().await?;

    tokio::select! {
        _ = runtime.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("Worker {} shutting down; leased jobs will stall and be re-leased", config.worker_id);
        }
    }
    Ok(())
}

async fn build_object_store(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.minio_url() {
        Some(url) => {
            tracing::info!("Using object store at {}", url);
            Ok(Arc::new(S3ObjectStore::connect(config).await?))
        }
        None => {
            tracing::warn!("MINIO_ENDPOINT not set; falling back to in-memory object store");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
    }
}

async fn ensure_buckets(store: &Arc<dyn ObjectStore>) -> anyhow::Result<()> {
    for bucket in [IMAGES_BUCKET, RESULTS_BUCKET] {
        if !store.bucket_exists(bucket).await? {
            store.make_bucket(bucket, "us-east-1").await?;
        }
    }
    Ok(())
}

fn bind_ip(hostname: &str) -> IpAddr {
    hostname
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
