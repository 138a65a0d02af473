//! Messages exchanged between clients, pools and miners.
//!
//! Each variant carries only the fields meaningful for it. [`Role`] holds the
//! routing table: which side of a connection may emit or accept a given
//! message type.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    ClientHello,
    MinerHello,
    Error,
    ProofOfWork,
    StatusUpdate,
    MineRequest,
    Transaction,
    BusyPool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// client -> pool, upon connecting
    ClientHello,
    /// miner -> pool, upon connecting
    MinerHello,
    /// pool -> client/miner, application level failure
    Error { data: String },
    /// miner -> pool, best nonce of a finished mine request
    ProofOfWork { data: String, nonce: u64, hash: u64 },
    /// miner -> pool, heartbeat while mining
    StatusUpdate { num_processed: u64 },
    /// pool -> miner, work assignment over `[lower, upper)`
    MineRequest { data: String, lower: u64, upper: u64 },
    /// client -> pool
    Transaction { data: String, upper: u64 },
    /// pool -> client, the pool is already serving someone
    BusyPool,
}

impl Message {
    pub fn client_hello() -> Self {
        Message::ClientHello
    }

    pub fn miner_hello() -> Self {
        Message::MinerHello
    }

    pub fn error(data: impl Into<String>) -> Self {
        Message::Error { data: data.into() }
    }

    pub fn proof_of_work(data: impl Into<String>, nonce: u64, hash: u64) -> Self {
        Message::ProofOfWork { data: data.into(), nonce, hash }
    }

    pub fn status_update(num_processed: u64) -> Self {
        Message::StatusUpdate { num_processed }
    }

    pub fn mine_request(data: impl Into<String>, lower: u64, upper: u64) -> Self {
        Message::MineRequest { data: data.into(), lower, upper }
    }

    pub fn transaction(data: impl Into<String>, upper: u64) -> Self {
        Message::Transaction { data: data.into(), upper }
    }

    pub fn busy_pool() -> Self {
        Message::BusyPool
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::ClientHello => MsgType::ClientHello,
            Message::MinerHello => MsgType::MinerHello,
            Message::Error { .. } => MsgType::Error,
            Message::ProofOfWork { .. } => MsgType::ProofOfWork,
            Message::StatusUpdate { .. } => MsgType::StatusUpdate,
            Message::MineRequest { .. } => MsgType::MineRequest,
            Message::Transaction { .. } => MsgType::Transaction,
            Message::BusyPool => MsgType::BusyPool,
        }
    }
}

/// The party on one end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Miner,
    Pool,
}

impl Role {
    pub fn can_send(&self, msg_type: MsgType) -> bool {
        use MsgType::*;
        match self {
            Role::Client => matches!(msg_type, ClientHello | Transaction),
            Role::Miner => matches!(msg_type, MinerHello | ProofOfWork | StatusUpdate),
            Role::Pool => matches!(msg_type, Error | MineRequest | BusyPool),
        }
    }

    pub fn can_receive(&self, msg_type: MsgType) -> bool {
        use MsgType::*;
        match self {
            Role::Client => matches!(msg_type, Error | BusyPool),
            Role::Miner => matches!(msg_type, Error | MineRequest),
            Role::Pool => matches!(
                msg_type,
                ClientHello | MinerHello | ProofOfWork | StatusUpdate | Transaction
            ),
        }
    }

    pub fn check_send(&self, msg: &Message) -> Result<(), ProtocolError> {
        let msg_type = msg.msg_type();
        if self.can_send(msg_type) {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedSend { role: *self, msg_type })
        }
    }

    pub fn check_receive(&self, msg: &Message) -> Result<(), ProtocolError> {
        let msg_type = msg.msg_type();
        if self.can_receive(msg_type) {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedReceive { role: *self, msg_type })
        }
    }
}
