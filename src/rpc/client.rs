//! [`ChainClient`] over the nonblocking Solana RPC client

use async_trait::async_trait;
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig,
    RpcSimulateTransactionConfig, RpcTransactionConfig,
};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::UiTransactionEncoding;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    ChainClient, ProgramAccount, RetryPolicy, RpcManagerError, RpcResult, SignatureState,
    SimulationReport, TokenBalanceEntry, TransactionFailure,
};

pub struct RpcChainClient {
    client: Arc<RpcClient>,
    endpoint: String,
    retry: RetryPolicy,
}

impl RpcChainClient {
    pub fn new(url: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            url.to_string(),
            timeout,
            CommitmentConfig::confirmed(),
        );
        Self {
            client: Arc::new(client),
            endpoint: url.to_string(),
            retry,
        }
    }

    fn classify(&self, err: solana_client::client_error::ClientError) -> RpcManagerError {
        RpcManagerError::from_client_error(err, &self.endpoint)
    }
}

fn failure_of(err: Option<impl Into<TransactionError>>) -> Option<TransactionFailure> {
    err.map(|e| TransactionFailure::from_transaction_error(&e.into()))
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn transaction_token_balances(
        &self,
        signature: &Signature,
    ) -> RpcResult<Vec<TokenBalanceEntry>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        let tx = self
            .retry
            .run("getTransaction", || async {
                self.client
                    .get_transaction_with_config(signature, config)
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await?;

        let meta = tx
            .transaction
            .meta
            .ok_or_else(|| RpcManagerError::InvalidData(format!("transaction {} has no meta", signature)))?;

        let balances = match meta.post_token_balances {
            OptionSerializer::Some(balances) => balances,
            _ => return Ok(Vec::new()),
        };

        Ok(balances
            .into_iter()
            .map(|b| TokenBalanceEntry {
                account_index: b.account_index,
                mint: b.mint,
                amount: b.ui_token_amount.amount,
                owner: match b.owner {
                    OptionSerializer::Some(owner) => Some(owner),
                    _ => None,
                },
            })
            .collect())
    }

    async fn scan_program_accounts(
        &self,
        program: &Pubkey,
        data_size: u64,
        offset: usize,
        mint: &Pubkey,
    ) -> RpcResult<Vec<ProgramAccount>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(data_size),
                RpcFilterType::Memcmp(Memcmp::new_base58_encoded(offset, mint.as_ref())),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            },
            ..Default::default()
        };

        let accounts = self
            .retry
            .run("getProgramAccounts", || async {
                self.client
                    .get_program_accounts_with_config(program, config.clone())
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await?;

        debug!(program = %program, offset, mint = %mint, count = accounts.len(), "Program account scan");

        Ok(accounts
            .into_iter()
            .map(|(pubkey, account)| ProgramAccount {
                pubkey,
                data: account.data,
            })
            .collect())
    }

    async fn account_data(&self, account: &Pubkey) -> RpcResult<Vec<u8>> {
        self.retry
            .run("getAccountInfo", || async {
                self.client
                    .get_account_data(account)
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await
    }

    async fn account_owner(&self, account: &Pubkey) -> RpcResult<Pubkey> {
        let account = self
            .retry
            .run("getAccountInfo", || async {
                self.client
                    .get_account(account)
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await?;
        Ok(account.owner)
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> RpcResult<u64> {
        let accounts = self
            .retry
            .run("getTokenAccountsByOwner", || async {
                self.client
                    .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(*mint))
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await?;

        let mut total: u64 = 0;
        for keyed in accounts {
            let UiAccountData::Json(parsed) = keyed.account.data else {
                return Err(RpcManagerError::InvalidData(format!(
                    "token account {} was not jsonParsed",
                    keyed.pubkey
                )));
            };
            let amount = parsed
                .parsed
                .pointer("/info/tokenAmount/amount")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    RpcManagerError::InvalidData(format!("token account {} has no amount", keyed.pubkey))
                })?;
            total = total.saturating_add(amount);
        }
        Ok(total)
    }

    async fn sol_balance(&self, owner: &Pubkey) -> RpcResult<u64> {
        self.retry
            .run("getBalance", || async {
                self.client.get_balance(owner).await.map_err(|e| self.classify(e))
            })
            .await
    }

    async fn latest_blockhash(&self) -> RpcResult<Hash> {
        self.retry
            .run("getLatestBlockhash", || async {
                self.client
                    .get_latest_blockhash()
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> RpcResult<SimulationReport> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::confirmed()),
            ..Default::default()
        };

        let response = self
            .retry
            .run("simulateTransaction", || async {
                self.client
                    .simulate_transaction_with_config(tx, config.clone())
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await?;

        let value = response.value;
        Ok(SimulationReport {
            err: failure_of(value.err),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send(&self, tx: &VersionedTransaction) -> RpcResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(3),
            ..Default::default()
        };

        self.retry
            .run("sendTransaction", || async {
                self.client
                    .send_transaction_with_config(tx, config)
                    .await
                    .map_err(|e| self.classify(e))
            })
            .await
    }

    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> RpcResult<Option<SignatureState>> {
        let statuses = self
            .retry
            .run("getSignatureStatuses", || async {
                let result = if search_history {
                    self.client
                        .get_signature_statuses_with_history(&[*signature])
                        .await
                } else {
                    self.client.get_signature_statuses(&[*signature]).await
                };
                result.map_err(|e| self.classify(e))
            })
            .await?;

        let Some(Some(status)) = statuses.value.into_iter().next() else {
            return Ok(None);
        };

        if let Some(failure) = failure_of(status.err.clone()) {
            return Ok(Some(SignatureState::Failed(failure)));
        }

        if status.satisfies_commitment(CommitmentConfig::confirmed()) {
            Ok(Some(SignatureState::Confirmed))
        } else {
            Ok(None)
        }
    }
}
