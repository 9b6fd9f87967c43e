use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, H256, U256};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    error::CoordinatorError,
    request::Mutation,
    settings::RelayConf,
    transaction::{Receipt, ReceiptStatus, TransactionHandle},
    waiter::{ReceiptPoll, ReceiptSource},
};

/// A call whose gas is paid by the relay sponsor.
#[derive(Debug, Clone)]
pub struct SponsoredCallArgs {
    pub chain_id: u64,
    pub target: Address,
    pub data: Bytes,
    pub gas_limit: Option<U256>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SponsoredCallBody<'a> {
    type_id: &'static str,
    chain_id: u64,
    target: Address,
    data: &'a Bytes,
    sponsor_api_key: &'a str,
    // the relay reads gas as a bignum, so it goes over the wire as a decimal string
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SponsoredCallReply {
    task_id: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
pub enum TaskState {
    CheckPending,
    ExecPending,
    WaitingForConfirmation,
    ExecSuccess,
    ExecReverted,
    Blacklisted,
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub chain_id: u64,
    pub task_id: String,
    pub task_state: TaskState,
    /// Populated in case of simulation error or cancellation
    pub last_check_message: Option<String>,
    /// Populated once the task is published to the mempool
    pub transaction_hash: Option<H256>,
    /// Populated when the transaction is mined
    pub block_number: Option<u64>,
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReply {
    /// Typically present when a task cannot be found
    pub message: Option<String>,
    pub task: Option<TaskStatus>,
}

impl TaskStatusReply {
    pub fn task_state(&self) -> TaskState {
        self.task
            .as_ref()
            .map(|task| task.task_state)
            .unwrap_or(TaskState::NotFound)
    }

    /// The relay only reports success once it considers the call final.
    pub fn to_receipt_poll(&self) -> ReceiptPoll {
        let Some(task) = &self.task else {
            // not indexed yet
            return ReceiptPoll::Pending;
        };
        let status = match task.task_state {
            TaskState::CheckPending
            | TaskState::ExecPending
            | TaskState::WaitingForConfirmation
            | TaskState::NotFound => return ReceiptPoll::Pending,
            TaskState::ExecSuccess => ReceiptStatus::Success,
            TaskState::ExecReverted | TaskState::Blacklisted | TaskState::Cancelled => {
                ReceiptStatus::Failure
            }
        };
        let failure_reason = match status {
            ReceiptStatus::Success => None,
            ReceiptStatus::Failure => Some(
                task.last_check_message
                    .clone()
                    .unwrap_or_else(|| format!("relay task {:?}", task.task_state)),
            ),
        };
        ReceiptPoll::Final(Receipt {
            status,
            transaction_hash: task.transaction_hash,
            block_number: task.block_number,
            logs: vec![],
            failure_reason,
        })
    }
}

/// Client for the gasless relay: submits sponsored calls and tracks their tasks.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    url: String,
    sponsor_api_key: String,
}

impl RelayClient {
    pub fn new(http: reqwest::Client, conf: &RelayConf) -> Self {
        Self {
            http,
            url: conf.url.trim_end_matches('/').to_string(),
            sponsor_api_key: conf.sponsor_api_key.clone(),
        }
    }

    #[instrument(skip(self), fields(relay = %self.url))]
    pub async fn sponsored_call(
        &self,
        args: &SponsoredCallArgs,
    ) -> Result<TransactionHandle, CoordinatorError> {
        let url = format!("{}/relays/v2/sponsored-call", self.url);
        let body = SponsoredCallBody {
            type_id: "SponsoredCall",
            chain_id: args.chain_id,
            target: args.target,
            data: &args.data,
            sponsor_api_key: &self.sponsor_api_key,
            gas_limit: args.gas_limit.map(|gas| gas.to_string()),
        };
        let res = self.http.post(url).json(&body).send().await?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(CoordinatorError::SubmissionFailed(format!(
                "relay rejected sponsored call with {status}: {text}"
            )));
        }
        let reply: SponsoredCallReply = res.json().await?;
        info!(task_id = reply.task_id, "Relay accepted sponsored call");
        Ok(TransactionHandle::RelayTask(reply.task_id))
    }

    #[instrument(skip(self), fields(relay = %self.url))]
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatusReply, CoordinatorError> {
        let url = format!("{}/tasks/status/{}", self.url, task_id);
        let res = self.http.get(url).send().await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(TaskStatusReply::default()),
            status if status.is_success() => Ok(res.json().await?),
            status if status.is_server_error() => Err(CoordinatorError::NetworkError(format!(
                "task status request failed with {status}"
            ))),
            status => Err(CoordinatorError::RelayError(format!(
                "task status request failed with {status}"
            ))),
        }
    }

    /// Mutation that broadcasts `args` through the relay instead of the user's wallet.
    pub fn sponsored_mutation(self: &Arc<Self>, args: SponsoredCallArgs) -> Mutation {
        let client = Arc::clone(self);
        Mutation::new(move || async move { client.sponsored_call(&args).await })
    }
}

#[async_trait]
impl ReceiptSource for RelayClient {
    async fn poll_receipt(
        &self,
        handle: &TransactionHandle,
    ) -> Result<ReceiptPoll, CoordinatorError> {
        let TransactionHandle::RelayTask(task_id) = handle else {
            return Err(CoordinatorError::UnsupportedHandle(handle.to_string()));
        };
        let reply = self.task_status(task_id).await?;
        debug!(task_id, state = ?reply.task_state(), "Polled relay task");
        Ok(reply.to_receipt_poll())
    }
}
