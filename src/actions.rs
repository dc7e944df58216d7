//! Messages between the UI controller and the background worker that talks to
//! the backend, so key handling never blocks on the network.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;

use crate::sdk::{Connection, LivestreamLoader, LocationProvider};

/// Requests from the controller to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Resolve a location, then connect to the backend.
    Bootstrap,
    /// (Re-)load the livestream listing.
    LoadLivestreams { refresh: bool },
}

/// Responses from the worker back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    BootstrapFinished(BootstrapOutcome),
    LivestreamsLoaded { refresh: bool, ok: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No usable location; connecting makes no sense yet.
    MissingLocation,
    /// The connection attempt itself failed.
    ConnectFailed,
    /// Connected; the connection-state sequence carries on from here.
    Connected,
}

/// Processes requests until the request channel closes.
pub async fn run_worker(
    mut requests: mpsc::Receiver<Request>,
    responses: mpsc::Sender<Response>,
    connection: Arc<dyn Connection>,
    loader: Arc<dyn LivestreamLoader>,
    location: Arc<dyn LocationProvider>,
) {
    while let Some(request) = requests.recv().await {
        debug!("worker handling {:?}", request);
        let response = match request {
            Request::Bootstrap => {
                let outcome = if location.locate().await.is_none() {
                    BootstrapOutcome::MissingLocation
                } else if connection.connect().await {
                    BootstrapOutcome::Connected
                } else {
                    BootstrapOutcome::ConnectFailed
                };
                Response::BootstrapFinished(outcome)
            }
            Request::LoadLivestreams { refresh } => {
                let ok = loader.load().await;
                Response::LivestreamsLoaded { refresh, ok }
            }
        };
        if responses.send(response).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::StaticLocationProvider;
    use crate::session::testutil::{FakeConnection, FakeLoader};

    #[tokio::test]
    async fn bootstrap_requires_a_location() {
        let (req_tx, req_rx) = mpsc::channel(4);
        let (resp_tx, mut resp_rx) = mpsc::channel(4);
        let worker = tokio::spawn(run_worker(
            req_rx,
            resp_tx,
            FakeConnection::new(),
            FakeLoader::new(),
            Arc::new(StaticLocationProvider::new(None, None)),
        ));

        req_tx.send(Request::Bootstrap).await.unwrap();
        assert_eq!(
            resp_rx.recv().await.unwrap(),
            Response::BootstrapFinished(BootstrapOutcome::MissingLocation)
        );

        drop(req_tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn bootstrap_connects_when_located() {
        let (req_tx, req_rx) = mpsc::channel(4);
        let (resp_tx, mut resp_rx) = mpsc::channel(4);
        tokio::spawn(run_worker(
            req_rx,
            resp_tx,
            FakeConnection::new(),
            FakeLoader::new(),
            Arc::new(StaticLocationProvider::new(Some(48.1), Some(11.5))),
        ));

        req_tx.send(Request::Bootstrap).await.unwrap();
        assert_eq!(
            resp_rx.recv().await.unwrap(),
            Response::BootstrapFinished(BootstrapOutcome::Connected)
        );
    }

    #[tokio::test]
    async fn load_reports_refresh_flag() {
        let (req_tx, req_rx) = mpsc::channel(4);
        let (resp_tx, mut resp_rx) = mpsc::channel(4);
        tokio::spawn(run_worker(
            req_rx,
            resp_tx,
            FakeConnection::new(),
            FakeLoader::new(),
            Arc::new(StaticLocationProvider::new(None, None)),
        ));

        req_tx
            .send(Request::LoadLivestreams { refresh: true })
            .await
            .unwrap();
        assert_eq!(
            resp_rx.recv().await.unwrap(),
            Response::LivestreamsLoaded {
                refresh: true,
                ok: true
            }
        );
    }
}
