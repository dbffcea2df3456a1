use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use chatserver_core::config::Config;
use chatserver_core::database::entities::{
    MySqlFriendRepo, MySqlGroupRepo, MySqlOfflineRepo, MySqlUserRepo,
};
use chatserver_core::database::connect;
use chatserver_core::logging;
use chatserver_core::pubsub::RedisPubSub;
use chatserver_core::registry::Registry;
use chatserver_core::router::Router;
use chatserver_core::server;

fn main() -> ExitCode {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(cfg.log_config.as_deref());

    // Built by hand rather than `#[tokio::main]` so the worker-thread
    // count is the one resolved by `Config::load` (spec.md §5's
    // recommended fixed pool, default 4) instead of tokio's own CPU-count
    // default.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.worker_threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start the tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = runtime.block_on(run(cfg)) {
        error!(target: "chatserver_core::main", "fatal error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cfg: Config) -> chatserver_core::errors::Result<()> {
    let pool = connect(&cfg.mysql_url).await?;

    let registry = Arc::new(Registry::new());
    let users = Arc::new(MySqlUserRepo::new(pool.clone()));
    let friends = Arc::new(MySqlFriendRepo::new(pool.clone()));
    let groups = Arc::new(MySqlGroupRepo::new(pool.clone()));
    let offline = Arc::new(MySqlOfflineRepo::new(pool));

    let pubsub = Arc::new(RedisPubSub::connect(&cfg.redis_url).await?);

    let router = Arc::new(Router::new(registry, users, friends, groups, offline, pubsub.clone()));

    // Startup reset (spec.md §4.F): must happen before anyone can bind a
    // connection, so do it before the inbound handler or the listener
    // are wired up.
    router.reset_on_startup().await;

    {
        let router = router.clone();
        pubsub.set_inbound_handler(move |userid, payload| {
            let router = router.clone();
            tokio::spawn(async move {
                router.handle_inbound_forward(userid, payload).await;
            });
        });
    }

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    server::log_listening_on(&cfg.listen_addr);
    info!(target: "chatserver_core::main", "worker threads configured: {}", cfg.worker_threads);

    server::serve(listener, router).await
}
