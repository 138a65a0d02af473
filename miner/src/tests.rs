use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use shared::{hash, Message, MiningConn, Role, StreamError};
use tokio::{net::TcpListener, time::timeout};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{Miner, MinerConfig};

const HEARTBEAT: Duration = Duration::from_millis(100);

async fn pool_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn config(addr: SocketAddr, speed_millis: u64) -> MinerConfig {
    MinerConfig {
        pool: addr.to_string(),
        speed_millis,
        heartbeat_millis: HEARTBEAT.as_millis() as u64,
        reconnect: 0,
    }
}

/// Connects a miner and accepts it on the pool side, consuming its hello.
async fn connected(speed_millis: u64) -> (Miner, MiningConn) {
    let (listener, addr) = pool_listener().await;
    let miner = Miner::connect(&config(addr, speed_millis)).await.unwrap();
    let (socket, _) = listener.accept().await.unwrap();
    let pool = MiningConn::new(socket, Role::Pool);
    assert_eq!(pool.recv_msg().await.unwrap(), Message::miner_hello());
    (miner, pool)
}

fn expected_proof(data: &str, lower: u64, upper: u64) -> Message {
    let nonce = (lower..upper).min_by_key(|nonce| hash(data, *nonce)).unwrap_or_default();
    Message::proof_of_work(data, nonce, hash(data, nonce))
}

async fn assert_silent(pool: &MiningConn, wait: Duration) {
    if let Ok(res) = timeout(wait, pool.recv_msg()).await {
        panic!("expected no message, got {res:?}");
    }
}

#[tokio::test]
async fn mine_request_answered_with_proof() {
    let (miner, pool) = connected(0).await;

    pool.send_msg(&Message::mine_request("abc", 0, 100)).await.unwrap();
    let proof = timeout(Duration::from_secs(5), pool.recv_msg()).await.unwrap().unwrap();

    assert_eq!(proof, expected_proof("abc", 0, 100));
    assert_eq!(miner.num_processed(), 100);
    assert!(!miner.is_mining());

    // the next request starts counting from zero again
    pool.send_msg(&Message::mine_request("abc", 100, 130)).await.unwrap();
    let proof = timeout(Duration::from_secs(5), pool.recv_msg()).await.unwrap().unwrap();
    assert_eq!(proof, expected_proof("abc", 100, 130));
    assert_eq!(miner.num_processed(), 30);
}

#[tokio::test]
async fn empty_range_proves_nonce_zero() {
    let (_miner, pool) = connected(0).await;

    pool.send_msg(&Message::mine_request("abc", 42, 42)).await.unwrap();
    let proof = timeout(Duration::from_secs(5), pool.recv_msg()).await.unwrap().unwrap();
    assert_eq!(proof, Message::proof_of_work("abc", 0, hash("abc", 0)));
}

#[tokio::test]
async fn heartbeats_only_while_mining() {
    let (miner, pool) = connected(5).await;

    assert_silent(&pool, HEARTBEAT * 3).await;

    // 200 nonces at 5ms each keep the miner busy for about a second
    pool.send_msg(&Message::mine_request("abc", 0, 200)).await.unwrap();

    let mut updates = vec![];
    let proof = loop {
        match timeout(Duration::from_secs(10), pool.recv_msg()).await.unwrap().unwrap() {
            Message::StatusUpdate { num_processed } => updates.push(num_processed),
            msg => break msg,
        }
    };

    assert_eq!(proof, expected_proof("abc", 0, 200));
    assert!(updates.len() >= 3, "too few heartbeats: {updates:?}");
    assert!(updates.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {updates:?}");
    assert!(updates.iter().all(|n| *n <= 200));
    assert!(updates.last() > updates.first(), "progress never advanced: {updates:?}");
    assert!(!miner.is_mining());

    // a tick racing the end of the search may still land right after the proof
    tokio::time::sleep(Duration::from_millis(20)).await;
    while let Ok(res) = timeout(Duration::from_millis(10), pool.recv_msg()).await {
        assert!(matches!(res, Ok(Message::StatusUpdate { .. })), "unexpected {res:?}");
    }
    assert_silent(&pool, HEARTBEAT * 4).await;
}

#[tokio::test]
async fn bad_messages_do_not_stop_the_miner() {
    let (listener, addr) = pool_listener().await;
    let miner = Miner::connect(&config(addr, 0)).await.unwrap();

    // speak the framing by hand so messages a pool may not send get through
    let (socket, _) = listener.accept().await.unwrap();
    let mut pool = Framed::new(socket, LengthDelimitedCodec::new());

    let encode = |msg: Message| Bytes::from(bincode::serialize(&msg).unwrap());
    let hello: Message = bincode::deserialize(&pool.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(hello, Message::miner_hello());

    pool.send(encode(Message::transaction("tx", 10))).await.unwrap();
    pool.send(Bytes::from_static(&[0xff, 0xff])).await.unwrap();
    pool.send(encode(Message::error("try again"))).await.unwrap();
    pool.send(encode(Message::mine_request("abc", 0, 50))).await.unwrap();

    let frame = timeout(Duration::from_secs(5), pool.next()).await.unwrap().unwrap().unwrap();
    let proof: Message = bincode::deserialize(&frame).unwrap();
    assert_eq!(proof, expected_proof("abc", 0, 50));
    assert!(!miner.is_shutdown());
}

#[tokio::test]
async fn shutdown_closes_connection() {
    let (miner, pool) = connected(0).await;

    pool.send_msg(&Message::mine_request("abc", 0, 10)).await.unwrap();
    pool.recv_msg().await.unwrap();

    miner.shutdown();
    miner.shutdown();
    assert!(miner.is_shutdown());

    let err = timeout(Duration::from_secs(2), pool.recv_msg()).await.unwrap().unwrap_err();
    assert!(err.is_transport());

    timeout(Duration::from_secs(2), miner.closed()).await.unwrap();
}

#[tokio::test]
async fn shutdown_while_mining_closes_promptly() {
    // 400 nonces at 5ms each take about two seconds
    let (miner, pool) = connected(5).await;

    pool.send_msg(&Message::mine_request("abc", 0, 400)).await.unwrap();
    let first = timeout(Duration::from_secs(2), pool.recv_msg()).await.unwrap().unwrap();
    assert!(matches!(first, Message::StatusUpdate { .. }));

    miner.shutdown();

    let closed = timeout(Duration::from_millis(1000), async {
        loop {
            match pool.recv_msg().await {
                Ok(Message::StatusUpdate { .. }) => continue,
                Ok(msg) => panic!("unexpected {msg:?}"),
                Err(err) => break err,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed.is_transport());

    // the search itself is not interrupted, the receive duty exits once it
    // finds the connection closed
    timeout(Duration::from_secs(5), miner.closed()).await.unwrap();
}

#[tokio::test]
async fn pool_disconnect_ends_duties() {
    let (miner, pool) = connected(0).await;

    pool.close().await;
    drop(pool);

    timeout(Duration::from_secs(2), miner.closed()).await.unwrap();
}

#[tokio::test]
async fn connect_fails_without_pool() {
    let (listener, addr) = pool_listener().await;
    drop(listener);

    let err = Miner::connect(&config(addr, 0)).await.err().unwrap();
    assert!(matches!(err, StreamError::Io(_)));
}
