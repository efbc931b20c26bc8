// src/main.rs

use seedkeeper::{cli, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = run(args).await {
        eprintln!("seedkeeper error: {err:?}");
        std::process::exit(1);
    }
}
