//! Example: reading a greeting from the hello server

use std::time::Duration;
use tether::net::TcpStream;

fn main() -> tether::Result<()> {
    let timeout = Some(Duration::from_secs(2));

    // Connect to the server started by the `hello_server` example
    let mut stream = TcpStream::new("127.0.0.1", 9000)?;
    stream.open(timeout)?;

    // Read until the server closes the connection
    let mut received = Vec::new();
    while !stream.is_closed() {
        received.extend(stream.read(1024, timeout)?);
    }

    println!("Received: {}", String::from_utf8_lossy(&received));
    Ok(())
}
