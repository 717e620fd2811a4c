use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use ethabi::{Address, Uint};
use log::{debug, error};

use crate::api::{
    format_units, parse_units, Notification, NotificationKind, Snapshot, TxHash, TOP_RIGHT,
};
use crate::contracts::{LotteryContract, TokenContract};
use crate::notifier::Notifier;
use crate::rpc::{wait_for_receipt, SharedRpc};

/// The dashboard client. Owns the snapshot and the contract handles; every
/// write action follows the same shape: guard on input and readiness, set
/// loading, submit, await one confirmation, refresh, emit one notification,
/// clear loading. Errors never escape an action.
pub struct Dashboard {
    rpc: SharedRpc,
    notifier: Box<dyn Notifier>,
    lottery_address: Address,
    account: Option<Address>,
    lottery: Option<LotteryContract>,
    token: Option<TokenContract>,
    snapshot: Snapshot,
    loading: bool,
}

impl Dashboard {
    pub fn new(rpc: SharedRpc, lottery_address: Address, notifier: Box<dyn Notifier>) -> Self {
        Self {
            rpc,
            notifier,
            lottery_address,
            account: None,
            lottery: None,
            token: None,
            snapshot: Snapshot::default(),
            loading: false,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Acquires the wallet account, builds both contract handles and reads
    /// the full snapshot. Stays uninitialized when the wallet exposes no
    /// account; subsequent actions then no-op.
    pub async fn initialize(&mut self) -> Result<()> {
        self.loading = true;
        let result = self.init_contracts().await;
        self.loading = false;
        result
    }

    async fn init_contracts(&mut self) -> Result<()> {
        let accounts = self.rpc.accounts().await?;
        let Some(account) = accounts.first().copied() else {
            debug!("wallet exposes no accounts, dashboard stays uninitialized");
            return Ok(());
        };
        let lottery = LotteryContract::new(self.rpc.clone(), self.lottery_address);
        let token_address = lottery
            .payment_token()
            .await
            .context("failed to read the payment token address")?;
        let token = TokenContract::new(self.rpc.clone(), token_address);

        let closing_time = lottery.bets_closing_time().await?;
        let now = self.rpc.latest_timestamp().await?;
        self.snapshot = Snapshot {
            bets_open: closing_time > Uint::from(now),
            bets_closing_time: format_closing_time(closing_time),
            bet_price: format_units(lottery.bet_price().await?),
            bet_fee: format_units(lottery.bet_fee().await?),
            purchase_ratio: lottery.purchase_ratio().await?.to_string(),
            prize_pool: format_units(lottery.prize_pool().await?),
            owner_pool: format_units(lottery.owner_pool().await?),
            account_prize: format_units(lottery.prize(account).await?),
            account_balance: format_units(token.balance_of(account).await?),
            token_name: token.name().await?,
            token_symbol: token.symbol().await?,
        };
        self.account = Some(account);
        self.lottery = Some(lottery);
        self.token = Some(token);
        Ok(())
    }

    /// Re-reads the dynamic snapshot fields. `bets_open` is left alone; the
    /// write actions set it themselves.
    pub async fn refresh(&mut self) -> Result<()> {
        let (Some(lottery), Some(token), Some(account)) =
            (self.lottery.clone(), self.token.clone(), self.account)
        else {
            bail!("refresh called before initialize")
        };
        self.snapshot.bets_closing_time = format_closing_time(lottery.bets_closing_time().await?);
        self.snapshot.prize_pool = format_units(lottery.prize_pool().await?);
        self.snapshot.owner_pool = format_units(lottery.owner_pool().await?);
        self.snapshot.account_prize = format_units(lottery.prize(account).await?);
        self.snapshot.account_balance = format_units(token.balance_of(account).await?);
        Ok(())
    }

    pub async fn open_bets(&mut self, duration: &str) {
        let (Some(lottery), Some(from)) = (self.lottery.clone(), self.account) else {
            return;
        };
        if duration.trim().is_empty() {
            return;
        }
        self.loading = true;
        match self.submit_open_bets(&lottery, from, duration).await {
            Ok(hash) => {
                self.snapshot.bets_open = true;
                self.notify_info(format!("Bets opened: {}", hash));
            }
            Err(err) => self.notify_error(err),
        }
        self.loading = false;
    }

    async fn submit_open_bets(
        &mut self,
        lottery: &LotteryContract,
        from: Address,
        duration: &str,
    ) -> Result<TxHash> {
        let duration: u64 = duration
            .trim()
            .parse()
            .context("duration must be a whole number of seconds")?;
        // Chain time, not the local clock.
        let now = self.rpc.latest_timestamp().await?;
        let deadline = Uint::from(now) + Uint::from(duration);
        let hash = lottery.open_bets(from, deadline).await?;
        self.confirm(&hash).await?;
        self.refresh().await?;
        Ok(hash)
    }

    pub async fn close_bets(&mut self) {
        let (Some(lottery), Some(from)) = (self.lottery.clone(), self.account) else {
            return;
        };
        self.loading = true;
        match self.submit_close_bets(&lottery, from).await {
            Ok(hash) => {
                self.snapshot.bets_open = false;
                self.notify_info(format!("Bets closed: {}", hash));
            }
            Err(err) => self.notify_error(err),
        }
        self.loading = false;
    }

    async fn submit_close_bets(&mut self, lottery: &LotteryContract, from: Address) -> Result<TxHash> {
        let hash = lottery.close_lottery(from).await?;
        self.confirm(&hash).await?;
        self.refresh().await?;
        Ok(hash)
    }

    pub async fn buy_tokens(&mut self, amount: &str) {
        let (Some(lottery), Some(from)) = (self.lottery.clone(), self.account) else {
            return;
        };
        if amount.trim().is_empty() {
            return;
        }
        self.loading = true;
        match self.submit_buy_tokens(&lottery, from, amount).await {
            Ok(hash) => self.notify_info(format!("Tokens purchased: {}", hash)),
            Err(err) => self.notify_error(err),
        }
        self.loading = false;
    }

    async fn submit_buy_tokens(
        &mut self,
        lottery: &LotteryContract,
        from: Address,
        amount: &str,
    ) -> Result<TxHash> {
        let value = parse_units(amount)?;
        let hash = lottery.purchase_tokens(from, value).await?;
        self.confirm(&hash).await?;
        self.refresh().await?;
        Ok(hash)
    }

    pub async fn bet(&mut self, times: &str) {
        let (Some(lottery), Some(token), Some(from)) =
            (self.lottery.clone(), self.token.clone(), self.account)
        else {
            return;
        };
        if times.trim().is_empty() {
            return;
        }
        self.loading = true;
        match self.submit_bet(&lottery, &token, from, times).await {
            Ok(hash) => self.notify_info(format!("Bets placed: {}", hash)),
            Err(err) => self.notify_error(err),
        }
        self.loading = false;
    }

    async fn submit_bet(
        &mut self,
        lottery: &LotteryContract,
        token: &TokenContract,
        from: Address,
        times: &str,
    ) -> Result<TxHash> {
        let times: u64 = times
            .trim()
            .parse()
            .context("bet count must be a whole number")?;
        let price = lottery.bet_price().await?;
        let fee = lottery.bet_fee().await?;
        // Allowance scoped to exactly this batch.
        let cost = price
            .checked_add(fee)
            .and_then(|entry| entry.checked_mul(Uint::from(times)))
            .context("bet cost overflows 256 bits")?;
        let approval = token.approve(from, lottery.address, cost).await?;
        self.confirm(&approval).await?;
        let hash = lottery.bet_many(from, Uint::from(times)).await?;
        self.confirm(&hash).await?;
        self.refresh().await?;
        Ok(hash)
    }

    pub async fn withdraw_prize(&mut self, amount: &str) {
        let (Some(lottery), Some(from)) = (self.lottery.clone(), self.account) else {
            return;
        };
        if amount.trim().is_empty() {
            return;
        }
        self.loading = true;
        match self.submit_withdraw_prize(&lottery, from, amount).await {
            Ok(hash) => self.notify_info(format!("Prize withdrawn: {}", hash)),
            Err(err) => self.notify_error(err),
        }
        self.loading = false;
    }

    async fn submit_withdraw_prize(
        &mut self,
        lottery: &LotteryContract,
        from: Address,
        amount: &str,
    ) -> Result<TxHash> {
        let amount = parse_units(amount)?;
        let hash = lottery.prize_withdraw(from, amount).await?;
        self.confirm(&hash).await?;
        self.refresh().await?;
        Ok(hash)
    }

    pub async fn withdraw_owner_pool(&mut self, amount: &str) {
        let (Some(lottery), Some(from)) = (self.lottery.clone(), self.account) else {
            return;
        };
        if amount.trim().is_empty() {
            return;
        }
        self.loading = true;
        match self.submit_withdraw_owner_pool(&lottery, from, amount).await {
            Ok(hash) => self.notify_info(format!("Owner pool withdrawn: {}", hash)),
            Err(err) => self.notify_error(err),
        }
        self.loading = false;
    }

    async fn submit_withdraw_owner_pool(
        &mut self,
        lottery: &LotteryContract,
        from: Address,
        amount: &str,
    ) -> Result<TxHash> {
        let amount = parse_units(amount)?;
        let hash = lottery.owner_withdraw(from, amount).await?;
        self.confirm(&hash).await?;
        self.refresh().await?;
        Ok(hash)
    }

    pub async fn burn_tokens(&mut self, _amount: &str) {
        // The burn affordance has no contract wiring yet.
    }

    async fn confirm(&self, hash: &TxHash) -> Result<()> {
        let receipt = wait_for_receipt(&self.rpc, hash).await?;
        if !receipt.status {
            bail!("transaction {} reverted", hash);
        }
        Ok(())
    }

    fn notify_info(&self, message: String) {
        self.notifier.notify(Notification {
            kind: NotificationKind::Info,
            title: "Tx Notification".to_string(),
            message,
            position: TOP_RIGHT,
        });
    }

    fn notify_error(&self, err: anyhow::Error) {
        error!("action failed: {:#}", err);
        self.notifier.notify(Notification {
            kind: NotificationKind::Error,
            title: "Error".to_string(),
            message: format!("Error message: {:#}", err),
            position: TOP_RIGHT,
        });
    }
}

fn format_closing_time(timestamp: Uint) -> String {
    Utc.timestamp_opt(timestamp.low_u64() as i64, 0)
        .single()
        .map(|time| time.to_rfc2822())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::api::parse_units;
    use crate::notifier::MemoryNotifier;
    use crate::rpc::SimRpc;

    fn sim_dashboard() -> (Dashboard, SimRpc, MemoryNotifier) {
        let sim = SimRpc::seeded();
        let notifier = MemoryNotifier::default();
        let rpc: SharedRpc = Arc::new(Box::new(sim.clone()));
        let dashboard = Dashboard::new(rpc, sim.lottery_address(), Box::new(notifier.clone()));
        (dashboard, sim, notifier)
    }

    #[tokio::test]
    async fn initialize_populates_snapshot() {
        let (mut dashboard, _sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        let snapshot = dashboard.snapshot();
        assert!(!snapshot.bets_open);
        assert_eq!(snapshot.bet_price, "1");
        assert_eq!(snapshot.bet_fee, "0.2");
        assert_eq!(snapshot.purchase_ratio, "100");
        assert_eq!(snapshot.account_balance, "0");
        assert_eq!(snapshot.token_name, "Lottery Token");
        assert_eq!(snapshot.token_symbol, "LT0");
        assert!(!dashboard.is_loading());
        // Reads never notify.
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_initialize_clears_loading() {
        let sim = SimRpc::seeded();
        let notifier = MemoryNotifier::default();
        let rpc: SharedRpc = Arc::new(Box::new(sim.clone()));
        // Wrong contract address, so reading paymentToken() reverts.
        let mut dashboard =
            Dashboard::new(rpc, Address::repeat_byte(0x99), Box::new(notifier.clone()));
        dashboard.initialize().await.unwrap_err();
        assert!(!dashboard.is_loading());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn open_bets_uses_chain_time() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        dashboard.open_bets("3600").await;

        let expected = Uint::from(sim.timestamp() + 3600);
        assert_eq!(sim.closing_time(), expected);
        assert!(dashboard.snapshot().bets_open);
        assert_eq!(
            dashboard.snapshot().bets_closing_time,
            format_closing_time(expected)
        );
        assert!(!dashboard.is_loading());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Info);
        assert!(sent[0].message.starts_with("Bets opened: 0x"));
        assert_eq!(sent[0].title, "Tx Notification");
        assert_eq!(sent[0].position, "topR");
    }

    #[tokio::test]
    async fn empty_input_is_inert() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        let requests = sim.request_count();

        dashboard.open_bets("").await;
        dashboard.buy_tokens("  ").await;
        dashboard.bet("").await;
        dashboard.withdraw_prize("").await;
        dashboard.withdraw_owner_pool("").await;

        assert_eq!(sim.request_count(), requests);
        assert!(notifier.sent().is_empty());
        assert!(!dashboard.is_loading());
    }

    #[tokio::test]
    async fn actions_before_initialize_are_inert() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.bet("1").await;
        dashboard.open_bets("3600").await;
        dashboard.close_bets().await;
        assert_eq!(sim.request_count(), 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn close_bets_keeps_closing_time() {
        let (mut dashboard, _sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        dashboard.open_bets("3600").await;
        let closing_time = dashboard.snapshot().bets_closing_time.clone();

        dashboard.close_bets().await;
        assert!(!dashboard.snapshot().bets_open);
        assert_eq!(dashboard.snapshot().bets_closing_time, closing_time);
        assert_eq!(notifier.sent().len(), 2);
        assert!(notifier.sent()[1].message.starts_with("Bets closed: 0x"));
    }

    #[tokio::test]
    async fn buy_tokens_increases_balance() {
        let (mut dashboard, _sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        assert_eq!(dashboard.snapshot().account_balance, "0");

        dashboard.buy_tokens("1").await;
        // 1 native unit at a ratio of 100.
        assert_eq!(dashboard.snapshot().account_balance, "100");
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].kind, NotificationKind::Info);
    }

    #[tokio::test]
    async fn bet_approves_scoped_allowance() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        dashboard.buy_tokens("1").await;

        dashboard.bet("3").await;
        // 3 bets at 1 + 0.2 each.
        assert_eq!(sim.approvals(), vec![parse_units("3.6").unwrap()]);
        assert_eq!(dashboard.snapshot().account_balance, "96.4");
        assert_eq!(dashboard.snapshot().prize_pool, "3");
        assert_eq!(dashboard.snapshot().owner_pool, "0.6");
        assert_eq!(notifier.sent().len(), 2);
        assert!(notifier.sent()[1].message.starts_with("Bets placed: 0x"));
    }

    #[tokio::test]
    async fn reverted_bet_emits_single_error() {
        let (mut dashboard, _sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        // No tokens bought, so betMany reverts in the sim.
        dashboard.bet("1").await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Error);
        assert!(sent[0].message.starts_with("Error message:"));
        assert!(!dashboard.is_loading());
    }

    #[tokio::test]
    async fn rejected_send_emits_single_error() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        sim.fail_next_send();
        dashboard.buy_tokens("1").await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Error);
        assert!(sent[0].message.contains("transaction rejected by node"));
        assert!(!dashboard.is_loading());
    }

    #[tokio::test]
    async fn malformed_duration_surfaces_error() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        dashboard.open_bets("soon").await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Error);
        assert!(!dashboard.snapshot().bets_open);
        assert_eq!(sim.closing_time(), Uint::zero());
    }

    #[tokio::test]
    async fn withdraw_prize_moves_it_to_balance() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        sim.seed_prize(sim.account_address(), parse_units("2").unwrap());
        dashboard.initialize().await.unwrap();
        assert_eq!(dashboard.snapshot().account_prize, "2");

        dashboard.withdraw_prize("2").await;
        assert_eq!(dashboard.snapshot().account_prize, "0");
        assert_eq!(dashboard.snapshot().account_balance, "2");
        assert_eq!(notifier.sent().len(), 1);
        assert!(notifier.sent()[0].message.starts_with("Prize withdrawn: 0x"));
    }

    #[tokio::test]
    async fn burn_tokens_is_inert() {
        let (mut dashboard, sim, notifier) = sim_dashboard();
        dashboard.initialize().await.unwrap();
        let requests = sim.request_count();
        dashboard.burn_tokens("5").await;
        assert_eq!(sim.request_count(), requests);
        assert!(notifier.sent().is_empty());
        assert!(!dashboard.is_loading());
    }
}
