use anyhow::Result;
use connwatch::config::ServerConfig;
use connwatch::servers::webhook::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: connwatch_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = if std::path::Path::new(&conf_file).exists() {
        ServerConfig::from_file(&conf_file)?
    } else {
        tracing::warn!("[server] [config] {} not found, using defaults", conf_file);
        ServerConfig::default()
    };

    tracing::info!("[server] [started] Connwatch Server Started");

    let state = AppState::new(config)?;
    webhook::run(state).await?;
    Ok(())
}
