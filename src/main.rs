use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();

	if rustls::crypto::CryptoProvider::install_default(
		rustls::crypto::aws_lc_rs::default_provider(),
	)
	.is_err()
	{
		error!("FATAL: failed to install default crypto provider");
		std::process::exit(1);
	}

	if let Err(err) = hubproxy::run().await {
		error!("startup failed: {}", err);
		std::process::exit(1);
	}
}

// vim: ts=4
