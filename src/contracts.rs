use anyhow::{anyhow, bail, Result};
use ethabi::{short_signature, Address, ParamType, Token, Uint};

use crate::api::TxHash;
use crate::rpc::{SharedRpc, TransactionRequest};

fn encode_call(name: &str, params: &[ParamType], args: &[Token]) -> Vec<u8> {
    let mut data = short_signature(name, params).to_vec();
    data.extend(ethabi::encode(args));
    data
}

fn decode_one(kind: ParamType, raw: &[u8]) -> Result<Token> {
    let mut tokens =
        ethabi::decode(&[kind], raw).map_err(|e| anyhow!("abi decode failed: {}", e))?;
    match (tokens.pop(), tokens.is_empty()) {
        (Some(token), true) => Ok(token),
        _ => bail!("expected a single abi value"),
    }
}

/// Handle for the lottery contract. Reads go through `eth_call`, writes
/// through the wallet as unsigned transactions.
#[derive(Clone)]
pub struct LotteryContract {
    rpc: SharedRpc,
    pub address: Address,
}

impl LotteryContract {
    pub fn new(rpc: SharedRpc, address: Address) -> Self {
        Self { rpc, address }
    }

    async fn read_uint(&self, name: &str) -> Result<Uint> {
        let raw = self.rpc.call(self.address, encode_call(name, &[], &[])).await?;
        match decode_one(ParamType::Uint(256), &raw)? {
            Token::Uint(value) => Ok(value),
            token => bail!("expected uint from {}(), got {:?}", name, token),
        }
    }

    async fn send(&self, from: Address, value: Option<Uint>, data: Vec<u8>) -> Result<TxHash> {
        let tx = TransactionRequest {
            from,
            to: self.address,
            value,
            data,
        };
        Ok(self.rpc.send_transaction(tx).await?)
    }

    pub async fn bet_price(&self) -> Result<Uint> {
        self.read_uint("betPrice").await
    }
    pub async fn bet_fee(&self) -> Result<Uint> {
        self.read_uint("betFee").await
    }
    pub async fn purchase_ratio(&self) -> Result<Uint> {
        self.read_uint("purchaseRatio").await
    }
    pub async fn bets_closing_time(&self) -> Result<Uint> {
        self.read_uint("betsClosingTime").await
    }
    pub async fn prize_pool(&self) -> Result<Uint> {
        self.read_uint("prizePool").await
    }
    pub async fn owner_pool(&self) -> Result<Uint> {
        self.read_uint("ownerPool").await
    }

    pub async fn prize(&self, account: Address) -> Result<Uint> {
        let data = encode_call(
            "prize",
            &[ParamType::Address],
            &[Token::Address(account)],
        );
        let raw = self.rpc.call(self.address, data).await?;
        match decode_one(ParamType::Uint(256), &raw)? {
            Token::Uint(value) => Ok(value),
            token => bail!("expected uint from prize(address), got {:?}", token),
        }
    }

    pub async fn payment_token(&self) -> Result<Address> {
        let raw = self
            .rpc
            .call(self.address, encode_call("paymentToken", &[], &[]))
            .await?;
        match decode_one(ParamType::Address, &raw)? {
            Token::Address(address) => Ok(address),
            token => bail!("expected address from paymentToken(), got {:?}", token),
        }
    }

    pub async fn open_bets(&self, from: Address, deadline: Uint) -> Result<TxHash> {
        let data = encode_call(
            "openBets",
            &[ParamType::Uint(256)],
            &[Token::Uint(deadline)],
        );
        self.send(from, None, data).await
    }

    pub async fn close_lottery(&self, from: Address) -> Result<TxHash> {
        self.send(from, None, encode_call("closeLottery", &[], &[]))
            .await
    }

    pub async fn purchase_tokens(&self, from: Address, value: Uint) -> Result<TxHash> {
        self.send(from, Some(value), encode_call("purchaseTokens", &[], &[]))
            .await
    }

    pub async fn bet_many(&self, from: Address, times: Uint) -> Result<TxHash> {
        let data = encode_call("betMany", &[ParamType::Uint(256)], &[Token::Uint(times)]);
        self.send(from, None, data).await
    }

    pub async fn prize_withdraw(&self, from: Address, amount: Uint) -> Result<TxHash> {
        let data = encode_call(
            "prizeWithdraw",
            &[ParamType::Uint(256)],
            &[Token::Uint(amount)],
        );
        self.send(from, None, data).await
    }

    pub async fn owner_withdraw(&self, from: Address, amount: Uint) -> Result<TxHash> {
        let data = encode_call(
            "ownerWithdraw",
            &[ParamType::Uint(256)],
            &[Token::Uint(amount)],
        );
        self.send(from, None, data).await
    }
}

/// Handle for the lottery's ERC-20 payment token.
#[derive(Clone)]
pub struct TokenContract {
    rpc: SharedRpc,
    pub address: Address,
}

impl TokenContract {
    pub fn new(rpc: SharedRpc, address: Address) -> Self {
        Self { rpc, address }
    }

    async fn read_string(&self, name: &str) -> Result<String> {
        let raw = self.rpc.call(self.address, encode_call(name, &[], &[])).await?;
        match decode_one(ParamType::String, &raw)? {
            Token::String(value) => Ok(value),
            token => bail!("expected string from {}(), got {:?}", name, token),
        }
    }

    pub async fn name(&self) -> Result<String> {
        self.read_string("name").await
    }
    pub async fn symbol(&self) -> Result<String> {
        self.read_string("symbol").await
    }

    pub async fn balance_of(&self, account: Address) -> Result<Uint> {
        let data = encode_call(
            "balanceOf",
            &[ParamType::Address],
            &[Token::Address(account)],
        );
        let raw = self.rpc.call(self.address, data).await?;
        match decode_one(ParamType::Uint(256), &raw)? {
            Token::Uint(value) => Ok(value),
            token => bail!("expected uint from balanceOf(address), got {:?}", token),
        }
    }

    pub async fn approve(&self, from: Address, spender: Address, amount: Uint) -> Result<TxHash> {
        let data = encode_call(
            "approve",
            &[ParamType::Address, ParamType::Uint(256)],
            &[Token::Address(spender), Token::Uint(amount)],
        );
        let tx = TransactionRequest {
            from,
            to: self.address,
            value: None,
            data,
        };
        Ok(self.rpc.send_transaction(tx).await?)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::rpc::SimRpc;

    #[test]
    fn erc20_selectors_match_known_values() {
        let data = encode_call(
            "balanceOf",
            &[ParamType::Address],
            &[Token::Address(Address::zero())],
        );
        assert_eq!(&data[..4], [0x70, 0xa0, 0x82, 0x31]);
        let data = encode_call(
            "approve",
            &[ParamType::Address, ParamType::Uint(256)],
            &[Token::Address(Address::zero()), Token::Uint(Uint::one())],
        );
        assert_eq!(&data[..4], [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(short_signature("name", &[]), [0x06, 0xfd, 0xde, 0x03]);
        assert_eq!(short_signature("symbol", &[]), [0x95, 0xd8, 0x9b, 0x41]);
    }

    #[tokio::test]
    async fn reads_seeded_lottery_state() {
        let sim = SimRpc::seeded();
        let rpc: SharedRpc = Arc::new(Box::new(sim.clone()));
        let lottery = LotteryContract::new(rpc.clone(), sim.lottery_address());
        assert_eq!(lottery.bet_price().await.unwrap(), Uint::exp10(18));
        assert_eq!(lottery.purchase_ratio().await.unwrap(), Uint::from(100u64));
        assert_eq!(lottery.payment_token().await.unwrap(), sim.token_address());

        let token = TokenContract::new(rpc, sim.token_address());
        assert_eq!(token.name().await.unwrap(), "Lottery Token");
        assert_eq!(token.symbol().await.unwrap(), "LT0");
        assert_eq!(
            token.balance_of(sim.account_address()).await.unwrap(),
            Uint::zero()
        );
    }
}
