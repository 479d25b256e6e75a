#[tokio::main(flavor = "current_thread")]
async fn main() {
    sealtun::gateway::main::run_gateway().await;
}
