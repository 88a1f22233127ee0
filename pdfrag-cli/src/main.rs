use anyhow::Result;
use pdfrag::Settings;
use pdfrag_telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = pdfrag_cli::parse();
    init_telemetry(cli.log_format, "info,pdfrag=debug")?;

    let settings = Settings::from_env()?;
    pdfrag_cli::run(cli.command, settings).await
}
