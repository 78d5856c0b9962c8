use std::time::Duration;

use bmsread::{BmsClient, ReaderConfig};

#[tokio::main]
pub async fn main() {
    let config = ReaderConfig::from_env().unwrap();
    let mut client = BmsClient::new(config).await.unwrap();
    loop {
        let snapshot = client.fetch_snapshot().await.unwrap();
        println!("{}", serde_json::to_string(&snapshot).unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
