//! Example: a server greeting every client with "hello"

use std::sync::Arc;
use std::time::Duration;
use tether::net::TcpServer;

fn main() -> tether::Result<()> {
    let server = Arc::new(
        TcpServer::builder()
            .thread_name("hello")
            .build(|mut stream| {
                // Greet the client, then hang up
                if let Ok(peer) = stream.peer_addr() {
                    println!("Greeting {peer}");
                }
                stream.write(b"hello", Some(Duration::from_secs(1)))?;
                stream.close();
                Ok(())
            })?,
    );

    server.bind("127.0.0.1", 9000)?;
    println!("Hello server listening on 127.0.0.1:9000");

    // Runs until the process is killed
    server.listen()
}
