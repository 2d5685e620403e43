use morfx_mcp_server::ServerOptions;
use morfx_mcp_server::run_main;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    run_main(ServerOptions::default()).await
}
