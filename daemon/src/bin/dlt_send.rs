//! Manual test client: sends a handful of log records to a running
//! daemon so the frames can be observed at the storage endpoint.

use dlt_relay::client::DltClient;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        println!("Usage: {} /path/to/dlt.sock <message>", args[0]);
        std::process::exit(1);
    }

    let client = DltClient::connect(&args[1], "sess").expect("couldn't create dlt client");
    client.info("app1", "ctx1", &args[2]).await;
    if client.send_failures() > 0 {
        println!("message was not delivered, is the daemon running?");
        std::process::exit(1);
    }
}
