#[tokio::main(flavor = "current_thread")]
async fn main() {
    sealtun::client::main::run_client().await;
}
