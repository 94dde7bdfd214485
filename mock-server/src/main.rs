use mock_couchdb::MockConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "5984".to_string());
    let addr = format!("127.0.0.1:{port}");
    let config = MockConfig::from_env();
    let listener = TcpListener::bind(&addr).await?;
    println!("mock CouchDB {} listening on {addr}", config.version);
    mock_couchdb::run_with(listener, config).await
}
