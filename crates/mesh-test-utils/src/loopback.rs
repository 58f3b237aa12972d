use tokio::net::{TcpListener, TcpStream};

/// Bind to a random loopback port, connect to it, and return the accepted
/// and dialed ends of the same TCP connection — the harness Scenario
/// A–F integration tests drive `Connection`/`ClusterLink` against instead
/// of a mocked codec.
pub async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("local_addr");

    let client = TcpStream::connect(addr).await.expect("connect loopback client");
    let (server, _) = listener.accept().await.expect("accept loopback connection");
    (server, client)
}
