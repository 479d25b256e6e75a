#[tokio::main(flavor = "current_thread")]
async fn main() {
    sealtun::enclave::main::run_enclave().await;
}
