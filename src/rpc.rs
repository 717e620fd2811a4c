use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethabi::{short_signature, Address, ParamType, Token, Uint};
use serde::Deserialize;
use thiserror::Error;

use crate::api::{parse_address, TxHash};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: Option<Uint>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub status: bool,
}

/// The handful of JSON-RPC methods the dashboard needs. The node's wallet
/// manages the signing account, so transactions go out unsigned via
/// `eth_sendTransaction`.
#[async_trait]
pub trait EthRpc {
    async fn accounts(&self) -> Result<Vec<Address>, RpcError>;
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError>;
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, RpcError>;
    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>, RpcError>;
    async fn latest_timestamp(&self) -> Result<u64, RpcError>;
}

pub type SharedRpc = Arc<Box<dyn EthRpc + Send + Sync>>;

/// Polls until the transaction has a receipt. Confirmation latency is the
/// chain's business; there is no local timeout.
pub async fn wait_for_receipt(rpc: &SharedRpc, hash: &TxHash) -> Result<TxReceipt, RpcError> {
    loop {
        if let Some(receipt) = rpc.transaction_receipt(hash).await? {
            return Ok(receipt);
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }
}

#[derive(Debug, Clone)]
pub struct HttpRpc {
    url: String,
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'a str,
    id: u32,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptBody {
    transaction_hash: String,
    status: Option<String>,
}

impl HttpRpc {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id: 1,
                method,
                params,
            })
            .send()
            .await?;
        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }
        // A pending eth_getTransactionReceipt legitimately answers with
        // `"result": null`; callers decide what null means.
        Ok(body.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl EthRpc for HttpRpc {
    async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        let value = self.request("eth_accounts", serde_json::json!([])).await?;
        let accounts: Vec<String> = serde_json::from_value(value)
            .map_err(|e| RpcError::UnexpectedResponse(format!("bad account list: {}", e)))?;
        accounts
            .iter()
            .map(|account| {
                parse_address(account)
                    .map_err(|e| RpcError::UnexpectedResponse(format!("{:#}", e)))
            })
            .collect()
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let params = serde_json::json!([
            { "to": format!("{:#x}", to), "data": hex_bytes(&data) },
            "latest",
        ]);
        let value = self.request("eth_call", params).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| RpcError::UnexpectedResponse("eth_call result is not hex".into()))?;
        parse_hex_bytes(raw)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, RpcError> {
        let mut body = serde_json::json!({
            "from": format!("{:#x}", tx.from),
            "to": format!("{:#x}", tx.to),
            "data": hex_bytes(&tx.data),
        });
        if let Some(value) = tx.value {
            body["value"] = serde_json::Value::String(format!("{:#x}", value));
        }
        let value = self
            .request("eth_sendTransaction", serde_json::json!([body]))
            .await?;
        value
            .as_str()
            .map(|hash| hash.to_string())
            .ok_or_else(|| RpcError::UnexpectedResponse("transaction hash is not a string".into()))
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
        let value = self
            .request("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let body: ReceiptBody = serde_json::from_value(value)
            .map_err(|e| RpcError::UnexpectedResponse(format!("bad receipt: {}", e)))?;
        let status = match body.status {
            Some(status) => parse_hex_u64(&status)? != 0,
            None => true,
        };
        Ok(Some(TxReceipt {
            transaction_hash: body.transaction_hash,
            status,
        }))
    }

    async fn latest_timestamp(&self) -> Result<u64, RpcError> {
        let value = self
            .request("eth_getBlockByNumber", serde_json::json!(["latest", false]))
            .await?;
        let timestamp = value
            .get("timestamp")
            .and_then(|t| t.as_str())
            .ok_or_else(|| RpcError::UnexpectedResponse("block without timestamp".into()))?;
        parse_hex_u64(timestamp)
    }
}

fn hex_bytes(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| RpcError::UnexpectedResponse(format!("bad hex {}: {}", s, e)))
}

fn parse_hex_u64(s: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::UnexpectedResponse(format!("bad hex number {}: {}", s, e)))
}

/// In-memory stand-in for the node, the lottery and the payment token,
/// decoding the same calldata the real contracts would see. Backs the CLI's
/// `--test` mode and the test suite.
#[derive(Debug, Clone)]
pub struct SimRpc {
    state: Arc<Mutex<SimChain>>,
}

#[derive(Debug)]
struct SimChain {
    account: Address,
    lottery: Address,
    token: Address,
    timestamp: u64,
    bet_price: Uint,
    bet_fee: Uint,
    purchase_ratio: Uint,
    bets_closing_time: Uint,
    prize_pool: Uint,
    owner_pool: Uint,
    token_name: String,
    token_symbol: String,
    prizes: HashMap<Address, Uint>,
    balances: HashMap<Address, Uint>,
    allowances: HashMap<(Address, Address), Uint>,
    approvals: Vec<Uint>,
    receipts: HashMap<TxHash, TxReceipt>,
    next_tx: u64,
    requests: u64,
    fail_next_send: bool,
}

impl SimRpc {
    pub fn seeded() -> Self {
        let chain = SimChain {
            account: Address::repeat_byte(0x11),
            lottery: Address::repeat_byte(0x22),
            token: Address::repeat_byte(0x33),
            timestamp: 1_700_000_000,
            bet_price: Uint::exp10(18),
            bet_fee: Uint::exp10(17) * 2,
            purchase_ratio: Uint::from(100u64),
            bets_closing_time: Uint::zero(),
            prize_pool: Uint::zero(),
            owner_pool: Uint::zero(),
            token_name: "Lottery Token".to_string(),
            token_symbol: "LT0".to_string(),
            prizes: HashMap::new(),
            balances: HashMap::new(),
            allowances: HashMap::new(),
            approvals: vec![],
            receipts: HashMap::new(),
            next_tx: 1,
            requests: 0,
            fail_next_send: false,
        };
        Self {
            state: Arc::new(Mutex::new(chain)),
        }
    }

    pub fn account_address(&self) -> Address {
        self.state.lock().unwrap().account
    }
    pub fn lottery_address(&self) -> Address {
        self.state.lock().unwrap().lottery
    }
    pub fn token_address(&self) -> Address {
        self.state.lock().unwrap().token
    }
    pub fn timestamp(&self) -> u64 {
        self.state.lock().unwrap().timestamp
    }
    pub fn closing_time(&self) -> Uint {
        self.state.lock().unwrap().bets_closing_time
    }
    pub fn request_count(&self) -> u64 {
        self.state.lock().unwrap().requests
    }
    /// Amounts passed to `approve`, in order.
    pub fn approvals(&self) -> Vec<Uint> {
        self.state.lock().unwrap().approvals.clone()
    }
    pub fn seed_prize(&self, account: Address, amount: Uint) {
        self.state.lock().unwrap().prizes.insert(account, amount);
    }
    pub fn fail_next_send(&self) {
        self.state.lock().unwrap().fail_next_send = true;
    }
}

impl SimChain {
    fn apply(&mut self, tx: &TransactionRequest) -> bool {
        let sel: [u8; 4] = match tx.data.get(..4).and_then(|s| s.try_into().ok()) {
            Some(sel) => sel,
            None => return false,
        };
        let args = &tx.data[4..];
        if tx.to == self.lottery {
            if sel == short_signature("openBets", &[ParamType::Uint(256)]) {
                let Some(deadline) = decode_uint(args) else {
                    return false;
                };
                self.bets_closing_time = deadline;
                true
            } else if sel == short_signature("closeLottery", &[]) {
                // Winner selection and payout bookkeeping stay inside the
                // real contract; the sim only acknowledges the call.
                true
            } else if sel == short_signature("purchaseTokens", &[]) {
                let Some(value) = tx.value else {
                    return false;
                };
                let minted = value * self.purchase_ratio;
                *self.balances.entry(tx.from).or_insert_with(Uint::zero) += minted;
                true
            } else if sel == short_signature("betMany", &[ParamType::Uint(256)]) {
                let Some(times) = decode_uint(args) else {
                    return false;
                };
                let cost = (self.bet_price + self.bet_fee) * times;
                let balance = self.balances.get(&tx.from).copied().unwrap_or_default();
                let allowance = self
                    .allowances
                    .get(&(tx.from, self.lottery))
                    .copied()
                    .unwrap_or_default();
                if balance < cost || allowance < cost {
                    return false;
                }
                self.balances.insert(tx.from, balance - cost);
                self.allowances
                    .insert((tx.from, self.lottery), allowance - cost);
                self.prize_pool += self.bet_price * times;
                self.owner_pool += self.bet_fee * times;
                true
            } else if sel == short_signature("prizeWithdraw", &[ParamType::Uint(256)]) {
                let Some(amount) = decode_uint(args) else {
                    return false;
                };
                let prize = self.prizes.get(&tx.from).copied().unwrap_or_default();
                if prize < amount {
                    return false;
                }
                self.prizes.insert(tx.from, prize - amount);
                *self.balances.entry(tx.from).or_insert_with(Uint::zero) += amount;
                true
            } else if sel == short_signature("ownerWithdraw", &[ParamType::Uint(256)]) {
                let Some(amount) = decode_uint(args) else {
                    return false;
                };
                if self.owner_pool < amount {
                    return false;
                }
                self.owner_pool -= amount;
                *self.balances.entry(tx.from).or_insert_with(Uint::zero) += amount;
                true
            } else {
                false
            }
        } else if tx.to == self.token {
            if sel == short_signature("approve", &[ParamType::Address, ParamType::Uint(256)]) {
                let Some((spender, amount)) = decode_address_uint(args) else {
                    return false;
                };
                self.approvals.push(amount);
                self.allowances.insert((tx.from, spender), amount);
                true
            } else {
                false
            }
        } else {
            false
        }
    }
}

#[async_trait]
impl EthRpc for SimRpc {
    async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        let mut chain = self.state.lock().unwrap();
        chain.requests += 1;
        Ok(vec![chain.account])
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let mut chain = self.state.lock().unwrap();
        chain.requests += 1;
        let sel: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| RpcError::UnexpectedResponse("calldata shorter than a selector".into()))?;
        let args = &data[4..];
        if to == chain.lottery {
            let value = if sel == short_signature("betPrice", &[]) {
                chain.bet_price
            } else if sel == short_signature("betFee", &[]) {
                chain.bet_fee
            } else if sel == short_signature("purchaseRatio", &[]) {
                chain.purchase_ratio
            } else if sel == short_signature("betsClosingTime", &[]) {
                chain.bets_closing_time
            } else if sel == short_signature("prizePool", &[]) {
                chain.prize_pool
            } else if sel == short_signature("ownerPool", &[]) {
                chain.owner_pool
            } else if sel == short_signature("prize", &[ParamType::Address]) {
                let account = decode_address(args).ok_or_else(|| {
                    RpcError::UnexpectedResponse("bad prize(address) calldata".into())
                })?;
                chain.prizes.get(&account).copied().unwrap_or_default()
            } else if sel == short_signature("paymentToken", &[]) {
                return Ok(ethabi::encode(&[Token::Address(chain.token)]));
            } else {
                return Err(RpcError::Node {
                    code: 3,
                    message: "execution reverted".to_string(),
                });
            };
            Ok(ethabi::encode(&[Token::Uint(value)]))
        } else if to == chain.token {
            if sel == short_signature("name", &[]) {
                Ok(ethabi::encode(&[Token::String(chain.token_name.clone())]))
            } else if sel == short_signature("symbol", &[]) {
                Ok(ethabi::encode(&[Token::String(chain.token_symbol.clone())]))
            } else if sel == short_signature("balanceOf", &[ParamType::Address]) {
                let account = decode_address(args).ok_or_else(|| {
                    RpcError::UnexpectedResponse("bad balanceOf(address) calldata".into())
                })?;
                let balance = chain.balances.get(&account).copied().unwrap_or_default();
                Ok(ethabi::encode(&[Token::Uint(balance)]))
            } else {
                Err(RpcError::Node {
                    code: 3,
                    message: "execution reverted".to_string(),
                })
            }
        } else {
            Err(RpcError::Node {
                code: 3,
                message: "execution reverted".to_string(),
            })
        }
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, RpcError> {
        let mut chain = self.state.lock().unwrap();
        chain.requests += 1;
        if chain.fail_next_send {
            chain.fail_next_send = false;
            return Err(RpcError::Node {
                code: -32000,
                message: "transaction rejected by node".to_string(),
            });
        }
        let status = chain.apply(&tx);
        let hash = format!("0x{:064x}", chain.next_tx);
        chain.next_tx += 1;
        chain.receipts.insert(
            hash.clone(),
            TxReceipt {
                transaction_hash: hash.clone(),
                status,
            },
        );
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
        let mut chain = self.state.lock().unwrap();
        chain.requests += 1;
        Ok(chain.receipts.get(hash).cloned())
    }

    async fn latest_timestamp(&self) -> Result<u64, RpcError> {
        let mut chain = self.state.lock().unwrap();
        chain.requests += 1;
        Ok(chain.timestamp)
    }
}

fn decode_uint(data: &[u8]) -> Option<Uint> {
    match ethabi::decode(&[ParamType::Uint(256)], data).ok()?.as_slice() {
        [Token::Uint(value)] => Some(*value),
        _ => None,
    }
}

fn decode_address(data: &[u8]) -> Option<Address> {
    match ethabi::decode(&[ParamType::Address], data).ok()?.as_slice() {
        [Token::Address(address)] => Some(*address),
        _ => None,
    }
}

fn decode_address_uint(data: &[u8]) -> Option<(Address, Uint)> {
    match ethabi::decode(&[ParamType::Address, ParamType::Uint(256)], data)
        .ok()?
        .as_slice()
    {
        [Token::Address(address), Token::Uint(value)] => Some((*address, *value)),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tx_request(sim: &SimRpc, data: Vec<u8>, value: Option<Uint>, to: Address) -> TransactionRequest {
        TransactionRequest {
            from: sim.account_address(),
            to,
            value,
            data,
        }
    }

    #[tokio::test]
    async fn purchase_mints_at_ratio() {
        let sim = SimRpc::seeded();
        let data = short_signature("purchaseTokens", &[]).to_vec();
        let tx = tx_request(&sim, data, Some(Uint::exp10(18)), sim.lottery_address());
        let hash = sim.send_transaction(tx).await.unwrap();
        let receipt = sim.transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(receipt.status);

        let mut query = short_signature("balanceOf", &[ParamType::Address]).to_vec();
        query.extend(ethabi::encode(&[Token::Address(sim.account_address())]));
        let raw = sim.call(sim.token_address(), query).await.unwrap();
        assert_eq!(decode_uint(&raw).unwrap(), Uint::exp10(18) * 100);
    }

    #[tokio::test]
    async fn bet_without_allowance_reverts() {
        let sim = SimRpc::seeded();
        let mut data = short_signature("betMany", &[ParamType::Uint(256)]).to_vec();
        data.extend(ethabi::encode(&[Token::Uint(Uint::from(1u64))]));
        let tx = tx_request(&sim, data, None, sim.lottery_address());
        let hash = sim.send_transaction(tx).await.unwrap();
        let receipt = sim.transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(!receipt.status);
    }

    async fn canned_rpc_server(body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn pending_receipt_is_none() {
        let url = canned_rpc_server(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).await;
        let rpc = HttpRpc::new(url);
        let receipt = rpc
            .transaction_receipt(&"0x01".to_string())
            .await
            .unwrap();
        assert_eq!(receipt, None);
    }

    #[tokio::test]
    async fn mined_receipt_is_decoded() {
        let url = canned_rpc_server(
            r#"{"jsonrpc":"2.0","id":1,"result":{"transactionHash":"0x01","status":"0x1"}}"#,
        )
        .await;
        let rpc = HttpRpc::new(url);
        let receipt = rpc
            .transaction_receipt(&"0x01".to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.transaction_hash, "0x01");
    }

    #[test]
    fn hex_helpers_round_trip() {
        assert_eq!(hex_bytes(&[0xde, 0xad]), "0xdead");
        assert_eq!(parse_hex_bytes("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0x64").unwrap(), 100);
        parse_hex_bytes("0xzz").unwrap_err();
    }
}
