//! Gateway behaviour on malformed, oversized and unexpected input
//!
//! A bad connection must get `error` (or just be closed) and must never take
//! the accept loop down with it.

use crate::test_utils::*;
use datamesh_mesh::protocol::{Framed, MAX_FRAME_LEN, REPLY_ERROR, REPLY_OK};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn connect(platform: &TestPlatform) -> Framed<TcpStream> {
    let stream = TcpStream::connect(platform.handle.local_addr()).await.unwrap();
    Framed::new(stream, TEST_TIMEOUT)
}

#[tokio::test]
async fn test_unknown_command_is_refused() {
    let platform = TestPlatform::start(false).await;
    let mut framed = connect(&platform).await;

    framed.write_frame("drop_tables").await.unwrap();
    assert_eq!(framed.read_frame().await.unwrap(), REPLY_ERROR);

    // the gateway keeps serving
    platform.client(&unused_address()).hello().await.unwrap();
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_authenticate_without_separator() {
    let platform = TestPlatform::start(true).await;
    let mut framed = connect(&platform).await;

    framed.write_frame("authenticate").await.unwrap();
    framed.expect(REPLY_OK).await.unwrap();
    framed.write_frame("consume").await.unwrap();
    assert_eq!(framed.read_frame().await.unwrap(), REPLY_ERROR);

    platform.handle.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_is_refused() {
    let platform = TestPlatform::start(false).await;
    let mut stream = TcpStream::connect(platform.handle.local_addr()).await.unwrap();

    let len = (MAX_FRAME_LEN as u32) + 1;
    stream.write_all(&len.to_be_bytes()).await.unwrap();
    let mut framed = Framed::new(stream, TEST_TIMEOUT);
    assert_eq!(framed.read_frame().await.unwrap(), REPLY_ERROR);

    platform.client(&unused_address()).hello().await.unwrap();
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_consume_sent_to_platform_is_refused() {
    let platform = TestPlatform::start(false).await;
    let mut framed = connect(&platform).await;

    framed.write_frame("consume 127.0.0.1:9101").await.unwrap();
    assert_eq!(framed.read_frame().await.unwrap(), REPLY_ERROR);

    platform.handle.stop().await;
}

#[tokio::test]
async fn test_abandoned_connection_does_not_block_others() {
    let platform = TestPlatform::start(false).await;

    // opens, sends nothing, stays open
    let _idle = TcpStream::connect(platform.handle.local_addr()).await.unwrap();
    let client = platform.client(&unused_address());
    client.hello().await.unwrap();
    assert!(client.discover().await.unwrap().is_empty());

    platform.handle.stop().await;
}

#[tokio::test]
async fn test_registration_from_unknown_domain() {
    let platform = TestPlatform::start(false).await;
    let client = platform.client(&unused_address());

    assert!(matches!(
        client.register_product("X").await,
        Err(datamesh_mesh::MeshError::UnknownDomain { .. })
    ));
    assert_eq!(platform.registry.domain_count().await, 0);

    platform.handle.stop().await;
}
