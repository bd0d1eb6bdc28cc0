use std::{
    fs::File,
    io::{self, Read},
    sync::Arc,
};

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Body, Client, StatusCode,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{gate::CommitGate, plan::Transfer};
use crate::{
    adapter::{
        commands,
        exec::{RemoteExec, SharedExec},
    },
    error::TransferError,
};

pub(crate) const ABANDONED: &str = "abandoned after timeout";

/// Where uploads go. The command channel has no native "put".
///
/// `gate` is settled by the caller when it stops waiting. A sink must not
/// make the file visible unless it wins [`CommitGate::commit`].
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(&self, transfer: &Transfer, gate: Arc<CommitGate>) -> Result<(), TransferError>;

    /// Whether a successful upload lands exactly at `transfer.remote`.
    fn writes_remote_path(&self) -> bool {
        false
    }

    /// Whether uploads run commands on the shared execution channel.
    fn uses_channel(&self) -> bool {
        false
    }
}

/// Posts files to an HTTP endpoint as a multipart form field named `file`.
///
/// The part's file name is the relative path. Only `200 OK` counts as
/// success.
#[derive(Debug, Clone)]
pub struct HttpUploadSink {
    client: Client,
    url: String,
}

impl HttpUploadSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl UploadSink for HttpUploadSink {
    async fn upload(&self, transfer: &Transfer, gate: Arc<CommitGate>) -> Result<(), TransferError> {
        let fail = |cause: &dyn std::fmt::Display| TransferError::upload(&transfer.path, cause);
        if gate.is_abandoned() {
            return Err(fail(&ABANDONED));
        }

        let file = tokio::fs::File::open(&transfer.local)
            .await
            .map_err(|err| fail(&err))?;
        let length = file.metadata().await.map_err(|err| fail(&err))?.len();

        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(transfer.path.clone());
        let form = Form::new().part("file", part);

        debug!(path = %transfer.path, url = %self.url, length, "posting file");

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| fail(&err))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(fail(&format!("server answered {status}: {}", body.trim())))
            }
        }
    }
}

/// Streams files into a remote `cat` through the command channel and moves
/// them into place once every byte has arrived.
#[derive(Clone)]
pub struct ExecUploadSink {
    exec: SharedExec,
}

impl ExecUploadSink {
    pub fn new(exec: SharedExec) -> Self {
        Self { exec }
    }
}

fn abandon_remote(exec: &dyn RemoteExec, tmp: &str) {
    if let Err(err) = exec.run(&commands::discard(tmp), None, &mut io::sink()) {
        warn!(tmp, %err, "could not remove remote temp file");
    }
}

/// Writes the temp sibling, then publishes it only if `gate` still allows.
fn upload_blocking(
    exec: &dyn RemoteExec,
    transfer: &Transfer,
    gate: &CommitGate,
) -> Result<(), TransferError> {
    let fail = |cause: &dyn std::fmt::Display| TransferError::upload(&transfer.path, cause);
    if gate.is_abandoned() {
        return Err(fail(&ABANDONED));
    }

    let file = File::open(&transfer.local).map_err(|err| fail(&err))?;
    let length = file.metadata().map_err(|err| fail(&err))?.len();
    let tmp = commands::temp_sibling(&transfer.remote);

    // Never send more than announced, even if the file grows meanwhile.
    let mut content = file.take(length);
    let status = exec
        .run(&commands::write_temp(&tmp, length), Some(&mut content), &mut io::sink())
        .map_err(|err| {
            abandon_remote(exec, &tmp);
            fail(&err)
        })?;
    if !status.success() {
        return Err(fail(&status.describe()));
    }

    if !gate.commit() {
        abandon_remote(exec, &tmp);
        return Err(fail(&ABANDONED));
    }

    let status = exec
        .run(
            &commands::publish(&tmp, &transfer.remote, Some(transfer.modified_at)),
            None,
            &mut io::sink(),
        )
        .map_err(|err| fail(&err))?;

    if status.success() {
        Ok(())
    } else {
        Err(fail(&status.describe()))
    }
}

#[async_trait]
impl UploadSink for ExecUploadSink {
    async fn upload(&self, transfer: &Transfer, gate: Arc<CommitGate>) -> Result<(), TransferError> {
        let exec = self.exec.clone();
        let transfer = transfer.clone();
        let path = transfer.path.clone();

        tokio::task::spawn_blocking(move || upload_blocking(&*exec, &transfer, &gate))
            .await
            .map_err(|err| TransferError::upload(&path, err))?
    }

    fn writes_remote_path(&self) -> bool {
        true
    }

    fn uses_channel(&self) -> bool {
        true
    }
}
