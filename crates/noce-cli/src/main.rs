mod cli;

#[tokio::main]
async fn main() {
    match cli::run_from_args().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("noce error: {:#}", err);
            std::process::exit(1);
        }
    }
}
