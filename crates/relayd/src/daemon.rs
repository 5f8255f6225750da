use relayvisor::{JsonFileStore, Registry};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api;
use crate::config::RelayConfig;
use crate::paths::RelayPaths;

/// Runs the relay daemon until interrupted, then stops every relay.
pub async fn run(config: RelayConfig, paths: RelayPaths) {
	let state_dir = paths.state_dir();
	let _ = std::fs::create_dir_all(&state_dir);

	let store_path = config.store_path(&paths);
	let store = match JsonFileStore::open(&store_path) {
		Ok(store) => store,
		Err(e) => {
			tracing::error!("cannot open stream store: {}", e);
			return;
		}
	};
	tracing::info!("stream store at {}", store_path.display());

	let registry = Arc::new(Registry::new(
		Arc::new(store),
		Arc::new(config.launcher()),
		config.supervisor_settings(&paths),
		config.registry_settings(),
	));

	let restored = registry.load_from_store().await;
	tracing::info!("daemon started (pid {}), {} streams restored", std::process::id(), restored);

	let http_registry = Arc::clone(&registry);
	let bind = config.server.bind.clone();
	let port = config.server.port;
	let http_handle = tokio::spawn(async move {
		run_http_server(http_registry, &bind, port).await;
	});

	tokio::select! {
		_ = http_handle => {},
		_ = shutdown_signal() => {
			tracing::info!("shutting down");
		}
	}

	let failed = registry.stop_all().await;
	if failed.is_empty() {
		tracing::info!("all relays stopped");
	} else {
		tracing::error!("relays that could not be stopped: {}", failed.join(", "));
	}
}

async fn run_http_server(registry: Arc<Registry>, bind: &str, port: u16) {
	let app = api::router(registry);
	let addr: SocketAddr = match format!("{}:{}", bind, port).parse() {
		Ok(addr) => addr,
		Err(e) => {
			tracing::error!("invalid bind address {}:{}: {}", bind, port, e);
			return;
		}
	};
	let listener = match tokio::net::TcpListener::bind(addr).await {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind HTTP on {}: {}", addr, e);
			return;
		}
	};
	tracing::info!("HTTP listening on {}", addr);
	if let Err(e) = axum::serve(listener, app).await {
		tracing::error!("HTTP server error: {}", e);
	}
}

async fn shutdown_signal() {
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
			}
			Err(e) => {
				tracing::warn!("cannot listen for SIGTERM: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {},
		_ = terminate => {},
	}
}
