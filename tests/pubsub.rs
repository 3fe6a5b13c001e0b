use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::Framed;

use redos::codec::FrameCodec;
use redos::config::Config;
use redos::frame::Frame;
use redos::server::Server;

struct Client {
    framed: Framed<TcpStream, FrameCodec>,
}

impl Client {
    async fn send(&mut self, args: &[&str]) {
        let frame = Frame::bulk_array(args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())));
        self.framed.send(frame).await.unwrap();
    }

    async fn next(&mut self) -> Frame {
        let node = timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a reply")
            .expect("connection closed")
            .unwrap();
        Frame::from(node)
    }

    async fn call(&mut self, args: &[&str]) -> Frame {
        self.send(args).await;
        self.next().await
    }
}

async fn start_server() -> std::net::SocketAddr {
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(server.run());
    addr
}

async fn client(addr: std::net::SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    Client {
        framed: Framed::new(stream, FrameCodec::default()),
    }
}

fn confirmation(notice: &str, name: &str, count: i64) -> Frame {
    Frame::Array(vec![
        Frame::Bulk(Bytes::copy_from_slice(notice.as_bytes())),
        Frame::Bulk(Bytes::copy_from_slice(name.as_bytes())),
        Frame::Integer(count),
    ])
}

#[tokio::test]
async fn test_subscribe_and_publish() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;
    let mut publisher = client(addr).await;

    assert_eq!(
        subscriber.call(&["SUBSCRIBE", "news"]).await,
        confirmation("subscribe", "news", 1)
    );

    assert_eq!(
        publisher.call(&["PUBLISH", "news", "hello"]).await,
        Frame::Integer(1)
    );
    assert_eq!(
        subscriber.next().await,
        Frame::bulk_array(["message", "news", "hello"])
    );
}

#[tokio::test]
async fn test_subscribe_to_several_channels() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;

    subscriber.send(&["SUBSCRIBE", "alpha", "beta"]).await;

    assert_eq!(subscriber.next().await, confirmation("subscribe", "alpha", 1));
    assert_eq!(subscriber.next().await, confirmation("subscribe", "beta", 2));
}

#[tokio::test]
async fn test_pattern_and_channel_subscriptions_both_deliver() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;
    let mut publisher = client(addr).await;

    assert_eq!(
        subscriber.call(&["SUBSCRIBE", "news.tech"]).await,
        confirmation("subscribe", "news.tech", 1)
    );
    assert_eq!(
        subscriber.call(&["PSUBSCRIBE", "news.*"]).await,
        confirmation("psubscribe", "news.*", 2)
    );

    assert_eq!(
        publisher.call(&["PUBLISH", "news.tech", "hi"]).await,
        Frame::Integer(2)
    );
    assert_eq!(
        subscriber.next().await,
        Frame::bulk_array(["message", "news.tech", "hi"])
    );
    assert_eq!(
        subscriber.next().await,
        Frame::bulk_array(["pmessage", "news.*", "news.tech", "hi"])
    );

    // Channels created after the pattern subscription pick it up as well.
    assert_eq!(
        publisher.call(&["PUBLISH", "news.sport", "goal"]).await,
        Frame::Integer(1)
    );
    assert_eq!(
        subscriber.next().await,
        Frame::bulk_array(["pmessage", "news.*", "news.sport", "goal"])
    );
}

#[tokio::test]
async fn test_subscription_mode_restricts_commands() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;

    subscriber.call(&["SUBSCRIBE", "news"]).await;

    assert_eq!(
        subscriber.call(&["SET", "key_1", "value_1"]).await,
        Frame::Error(
            "ERR Can't execute 'set': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context".to_string()
        )
    );
    assert_eq!(
        subscriber.call(&["PING"]).await,
        Frame::bulk_array(["pong", ""])
    );
}

#[tokio::test]
async fn test_unsubscribe_from_everything_leaves_subscription_mode() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;
    let mut publisher = client(addr).await;

    subscriber.send(&["SUBSCRIBE", "alpha", "beta"]).await;
    subscriber.next().await;
    subscriber.next().await;

    subscriber.send(&["UNSUBSCRIBE"]).await;
    assert_eq!(
        subscriber.next().await,
        confirmation("unsubscribe", "alpha", 1)
    );
    assert_eq!(
        subscriber.next().await,
        confirmation("unsubscribe", "beta", 0)
    );

    assert_eq!(
        publisher.call(&["PUBLISH", "alpha", "gone"]).await,
        Frame::Integer(0)
    );
    assert_eq!(
        subscriber.call(&["ECHO", "back"]).await,
        Frame::Bulk(Bytes::from("back"))
    );
}

#[tokio::test]
async fn test_unsubscribe_confirms_every_name_past_zero() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;

    subscriber.call(&["SUBSCRIBE", "alpha"]).await;

    subscriber.send(&["UNSUBSCRIBE", "alpha", "beta"]).await;
    assert_eq!(
        subscriber.next().await,
        confirmation("unsubscribe", "alpha", 0)
    );
    assert_eq!(
        subscriber.next().await,
        confirmation("unsubscribe", "beta", 0)
    );

    assert_eq!(
        subscriber.call(&["UNSUBSCRIBE", "alpha"]).await,
        Frame::Error("ERR connection is not in subscription mode".to_string())
    );
}

#[tokio::test]
async fn test_punsubscribe_stops_pattern_delivery() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;
    let mut publisher = client(addr).await;

    subscriber.call(&["PSUBSCRIBE", "h?llo"]).await;
    assert_eq!(
        publisher.call(&["PUBLISH", "hello", "1"]).await,
        Frame::Integer(1)
    );
    subscriber.next().await;

    assert_eq!(
        subscriber.call(&["PUNSUBSCRIBE", "h?llo"]).await,
        confirmation("punsubscribe", "h?llo", 0)
    );
    assert_eq!(
        publisher.call(&["PUBLISH", "hello", "2"]).await,
        Frame::Integer(0)
    );
}

#[tokio::test]
async fn test_disconnect_drops_subscriptions() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;
    let mut publisher = client(addr).await;

    subscriber.call(&["SUBSCRIBE", "news"]).await;
    assert_eq!(
        publisher.call(&["PUBSUB", "NUMSUB", "news"]).await,
        Frame::Array(vec![Frame::Bulk(Bytes::from("news")), Frame::Integer(1)])
    );

    drop(subscriber);

    // The server notices the disconnect on its next poll of that socket.
    let mut count = Frame::Null;
    for _ in 0..50 {
        count = publisher.call(&["PUBLISH", "news", "anyone"]).await;
        if count == Frame::Integer(0) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(count, Frame::Integer(0));
}

#[tokio::test]
async fn test_quit() {
    let addr = start_server().await;
    let mut subscriber = client(addr).await;

    subscriber.call(&["SUBSCRIBE", "news"]).await;
    assert_eq!(
        subscriber.call(&["QUIT"]).await,
        Frame::Simple("OK".to_string())
    );

    let next = timeout(Duration::from_secs(5), subscriber.framed.next())
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_half_close_still_gets_the_reply() {
    let addr = start_server().await;
    let mut client = client(addr).await;

    client.send(&["PING"]).await;
    client.framed.get_mut().shutdown().await.unwrap();

    assert_eq!(client.next().await, Frame::Simple("PONG".to_string()));

    let next = timeout(Duration::from_secs(5), client.framed.next())
        .await
        .unwrap();
    assert!(next.is_none());
}
