//! Shared fixtures for the integration tests

#![allow(dead_code)]

use certmcp::store::{Attachment, Collaborators, Member, MemoryStore, Record};
use certmcp::{Dispatcher, ShutdownCoordinator, ToolRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tooling::runtime::PolicySnapshot;

pub const ID_CARD: &str = "110101199001010011";
pub const PHONE: &str = "13800138000";

pub fn record(id: i64, name: &str, date: &str, members: Vec<Member>) -> Record {
    Record {
        id,
        competition_name: name.into(),
        award_date: date.parse().unwrap(),
        level: "national".into(),
        rank: "first".into(),
        certificate_code: Some(format!("CERT-{:04}", id)),
        remarks: None,
        attachment_folder: Some(format!("{}", id)),
        deleted: false,
        deleted_at: None,
        members,
        attachments: None,
    }
}

pub fn member(id: i64, name: &str) -> Member {
    let mut member = Member::named(id, name);
    member.id_card = Some(ID_CARD.into());
    member.phone = Some(PHONE.into());
    member.student_id = Some(format!("S{:06}", id));
    member
}

pub fn attachment(id: i64, record_id: i64, name: &str) -> Attachment {
    Attachment {
        id,
        record_id,
        stored_name: format!("{}.bin", id),
        original_name: name.into(),
        relative_path: format!("{}/{}.bin", record_id, id),
        file_md5: None,
        file_size: None,
        deleted: false,
    }
}

/// A store holding two records, two members and one 2 MiB attachment
pub fn populated_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let alice = member(10, "Alice");
    let bob = member(11, "Bob");
    store.insert_member(alice.clone());
    store.insert_member(bob.clone());
    store.insert_record(record(1, "Robotics Cup", "2024-05-01", vec![alice.clone(), bob]));
    store.insert_record(record(2, "Math Olympiad", "2023-11-12", vec![alice]));
    store.insert_attachment(attachment(100, 1, "certificate.pdf"), vec![7u8; 2 * 1024 * 1024]);
    store
}

pub fn registry(store: Arc<MemoryStore>, policy: PolicySnapshot) -> ToolRegistry {
    ToolRegistry::new(Collaborators::memory(store), Arc::new(policy))
}

pub fn dispatcher(store: Arc<MemoryStore>) -> Dispatcher {
    Dispatcher::new(registry(store, PolicySnapshot::default()))
}

/// An event-stream binding on an ephemeral loopback port
pub struct SseServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownCoordinator,
    pub handle: JoinHandle<Result<(), certmcp::error::TransportError>>,
}

impl SseServer {
    pub async fn start(dispatcher: Dispatcher) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownCoordinator::new();
        let handle = tokio::spawn(certmcp::transport::sse::serve(
            listener,
            dispatcher,
            shutdown.clone(),
        ));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.request_shutdown();
        self.handle.await.unwrap().unwrap();
    }
}
