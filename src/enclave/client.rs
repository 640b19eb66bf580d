// Sigvault — Boundary Client
//
// Caller-side end of the boundary channel. Each call takes a fresh correlation
// id, parks a oneshot sender under it, and waits; a router task delivers
// responses to whichever caller owns the id, so replies may arrive in any order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::envelope::WrapSecret;
use super::protocol::{
    BoundaryCommand, BoundaryReply, BoundaryRequest, BoundaryResponse, Signature, SignerBackend,
};
use super::EnclaveError;
use crate::store::StoreOp;

type Outcome = Result<BoundaryReply, EnclaveError>;
type PendingMap = DashMap<u64, oneshot::Sender<Outcome>>;

pub struct BoundaryClient {
    requests: mpsc::Sender<BoundaryRequest>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl BoundaryClient {
    pub(super) fn start(
        requests: mpsc::Sender<BoundaryRequest>,
        responses: mpsc::Receiver<BoundaryResponse>,
        stop: oneshot::Sender<()>,
    ) -> Self {
        let pending = Arc::new(DashMap::new());
        tokio::spawn(route_responses(responses, Arc::clone(&pending)));

        Self {
            requests,
            pending,
            next_id: AtomicU64::new(1),
            stop: Mutex::new(Some(stop)),
        }
    }

    /// Send one command and wait for its reply.
    pub async fn call(&self, command: BoundaryCommand) -> Outcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self
            .requests
            .send(BoundaryRequest { id, command })
            .await
            .is_err()
        {
            self.pending.remove(&id);
            return Err(EnclaveError::Unavailable);
        }

        rx.await.map_err(|_| EnclaveError::Unavailable)?
    }

    pub async fn generate_key(
        &self,
        signer_id: &str,
        backend: SignerBackend,
        label: &str,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), EnclaveError> {
        let command = BoundaryCommand::GenerateKey {
            signer_id: signer_id.to_string(),
            backend,
            label: label.to_string(),
        };
        match self.call(command).await? {
            BoundaryReply::Generated {
                public_key,
                credential_ref,
            } => Ok((public_key, credential_ref)),
            _ => Err(EnclaveError::UnexpectedReply("generateKey")),
        }
    }

    pub async fn get_address(&self, signer_id: &str) -> Result<Option<Vec<u8>>, EnclaveError> {
        let command = BoundaryCommand::GetAddress {
            signer_id: signer_id.to_string(),
        };
        match self.call(command).await? {
            BoundaryReply::Address(address) => Ok(address),
            _ => Err(EnclaveError::UnexpectedReply("getAddress")),
        }
    }

    pub async fn sign(
        &self,
        signer_id: &str,
        message: Vec<u8>,
        unlock: Option<WrapSecret>,
    ) -> Result<Signature, EnclaveError> {
        let command = BoundaryCommand::Sign {
            signer_id: signer_id.to_string(),
            message,
            unlock,
        };
        match self.call(command).await? {
            BoundaryReply::Signed(signature) => Ok(signature),
            _ => Err(EnclaveError::UnexpectedReply("sign")),
        }
    }

    pub async fn persist_key(
        &self,
        signer_id: &str,
        wrap: WrapSecret,
        companion: Vec<StoreOp>,
    ) -> Result<(), EnclaveError> {
        let command = BoundaryCommand::PersistKey {
            signer_id: signer_id.to_string(),
            wrap,
            companion,
        };
        match self.call(command).await? {
            BoundaryReply::Persisted => Ok(()),
            _ => Err(EnclaveError::UnexpectedReply("persistKey")),
        }
    }

    pub async fn delete_key(
        &self,
        signer_id: &str,
        companion: Vec<StoreOp>,
    ) -> Result<(), EnclaveError> {
        let command = BoundaryCommand::DeleteKey {
            signer_id: signer_id.to_string(),
            companion,
        };
        match self.call(command).await? {
            BoundaryReply::Deleted => Ok(()),
            _ => Err(EnclaveError::UnexpectedReply("deleteKey")),
        }
    }

    /// Stop the boundary. Ephemeral keys are gone once in-flight requests finish.
    pub fn shutdown(&self) {
        let stop = self.stop.lock().ok().and_then(|mut s| s.take());
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Requests sent but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

async fn route_responses(mut responses: mpsc::Receiver<BoundaryResponse>, pending: Arc<PendingMap>) {
    while let Some(BoundaryResponse { id, outcome }) = responses.recv().await {
        match pending.remove(&id) {
            Some((_, waiter)) => {
                // The caller may have given up; nothing to do then.
                let _ = waiter.send(outcome);
            }
            None => tracing::warn!(request_id = id, "Dropping response for unknown request id"),
        }
    }

    // Boundary is gone: wake every waiter with a closed channel.
    pending.clear();
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A client wired to hand-driven channels instead of a real boundary.
    fn detached_client() -> (
        BoundaryClient,
        mpsc::Receiver<BoundaryRequest>,
        mpsc::Sender<BoundaryResponse>,
    ) {
        let (request_tx, request_rx) = mpsc::channel(8);
        let (response_tx, response_rx) = mpsc::channel(8);
        let (stop_tx, _stop_rx) = oneshot::channel();
        (
            BoundaryClient::start(request_tx, response_rx, stop_tx),
            request_rx,
            response_tx,
        )
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_the_right_caller() {
        let (client, mut requests, responses) = detached_client();
        let client = Arc::new(client);

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_address("first").await })
        };
        let first_request = requests.recv().await.unwrap();

        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_address("second").await })
        };
        let second_request = requests.recv().await.unwrap();
        assert_ne!(first_request.id, second_request.id, "Correlation ids must be unique");

        // Answer the second request first.
        responses
            .send(BoundaryResponse {
                id: second_request.id,
                outcome: Ok(BoundaryReply::Address(Some(b"second".to_vec()))),
            })
            .await
            .unwrap();
        responses
            .send(BoundaryResponse {
                id: first_request.id,
                outcome: Ok(BoundaryReply::Address(Some(b"first".to_vec()))),
            })
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Some(b"first".to_vec()));
        assert_eq!(second.await.unwrap().unwrap(), Some(b"second".to_vec()));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_typed_error_is_delivered() {
        let (client, mut requests, responses) = detached_client();
        let client = Arc::new(client);

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.sign("gone", b"m".to_vec(), None).await })
        };
        let request = requests.recv().await.unwrap();
        responses
            .send(BoundaryResponse {
                id: request.id,
                outcome: Err(EnclaveError::SignerNotFound("gone".into())),
            })
            .await
            .unwrap();

        assert!(matches!(
            call.await.unwrap(),
            Err(EnclaveError::SignerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_rejected() {
        let (client, mut requests, responses) = detached_client();
        let client = Arc::new(client);

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.delete_key("s1", vec![]).await })
        };
        let request = requests.recv().await.unwrap();
        responses
            .send(BoundaryResponse {
                id: request.id,
                outcome: Ok(BoundaryReply::Persisted),
            })
            .await
            .unwrap();

        assert!(matches!(
            call.await.unwrap(),
            Err(EnclaveError::UnexpectedReply("deleteKey"))
        ));
    }

    #[tokio::test]
    async fn test_closed_boundary_is_unavailable() {
        let (client, requests, responses) = detached_client();
        drop(requests);
        drop(responses);

        assert!(!client.is_running());
        let result = client.get_address("s1").await;
        assert!(matches!(result, Err(EnclaveError::Unavailable)));
    }

    #[tokio::test]
    async fn test_waiters_are_released_when_boundary_dies() {
        let (client, mut requests, responses) = detached_client();
        let client = Arc::new(client);

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_address("s1").await })
        };
        let _request = requests.recv().await.unwrap();
        drop(responses);

        assert!(matches!(call.await.unwrap(), Err(EnclaveError::Unavailable)));
    }
}
