#[tokio::main]
async fn main() {
    let units = match brandshop_migrations::unit_set() {
        Ok(units) => units,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    docshift::cli::run(units).await;
}
