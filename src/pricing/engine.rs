//! Multi-pass USD price resolution.
//!
//! A cycle runs `Seed → Resolve → Statistics → Persist` over a fresh
//! [`CycleState`]:
//!
//! 1. **Seed**: reference tokens (with an oracle id) get their price from the
//!    oracle. A rate limit or outage switches the oracle off for the rest of
//!    the cycle and those tokens fall through to pool pricing.
//! 2. **Resolve**: up to [`MAX_PASSES`] relaxation passes. Each pass orders
//!    the unpriced tokens by how many priced neighbours they have and prices
//!    them, [`BATCH_SIZE`] at a time against a snapshot of the cache, from
//!    their [`TOP_POOLS`] deepest pools with a priced counterpart. A pass that
//!    prices nothing ends the loop. Tokens still unpriced after the passes get
//!    a breadth-first path search of at most [`MAX_PATH_DEPTH`] hops.
//! 3. **Statistics**: 24h volume and 1h/24h change per priced token; TVL,
//!    volume, fees and APR per pool with both sides priced.
//! 4. **Persist**: one transaction per statistics table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use alloy::primitives::U512;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::math::{
    liquidity_to_amounts, ratio_to_decimal, raw_amount_to_decimal, sqrt_price_x96_to_inverse_price,
    sqrt_price_x96_to_price, MAX_SQRT_RATIO, MIN_SQRT_RATIO,
};
use crate::db::models::{now_ts, PoolRecord, PoolStatistic, TokenRecord, TokenStatistic};
use crate::db::StorageGateway;
use crate::error::{IndexerError, IndexerResult};
use crate::oracle::PriceOracleGateway;

/// Upper bound on relaxation passes per cycle.
pub const MAX_PASSES: usize = 5;

/// Tokens resolved against one cache snapshot.
pub const BATCH_SIZE: usize = 10;

/// Deepest pools considered when pricing a token.
pub const TOP_POOLS: usize = 3;

/// Longest pool path tried by the fallback search.
pub const MAX_PATH_DEPTH: usize = 4;

const HOUR: i64 = 3_600;
const DAY: i64 = 24 * HOUR;

/// How a token got its price in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PriceSource {
    /// External oracle
    Oracle,
    /// Direct pools, resolved in this pass (1-based)
    Pool {
        /// Pass number
        pass: usize,
    },
    /// Multi-hop path search
    Path {
        /// Pools crossed
        hops: usize,
    },
}

/// Per-cycle working state. Built at cycle start and dropped at the end.
#[derive(Debug, Default)]
struct CycleState {
    prices: HashMap<String, Decimal>,
    sources: HashMap<String, PriceSource>,
    oracle_backoff: bool,
    passes: usize,
}

impl CycleState {
    fn set(&mut self, token: String, price: Decimal, source: PriceSource) {
        self.sources.insert(token.clone(), source);
        self.prices.insert(token, price);
    }
}

/// Summary of one resolution cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Tokens in active pools
    pub tokens: usize,
    /// Resolved USD prices by token address
    pub prices: HashMap<String, Decimal>,
    /// Where each price came from
    pub sources: HashMap<String, PriceSource>,
    /// Tokens left without a price
    pub unpriced: Vec<String>,
    /// Relaxation passes that ran
    pub passes: usize,
    /// Oracle was rate limited or unavailable this cycle
    pub oracle_backoff: bool,
    /// Token statistic rows written
    pub token_statistics: usize,
    /// Pool statistic rows written
    pub pool_statistics: usize,
}

impl CycleReport {
    /// Count of prices from `source`-like origins.
    #[must_use]
    pub fn count_by(&self, matches: impl Fn(&PriceSource) -> bool) -> usize {
        self.sources.values().filter(|s| matches(s)).count()
    }
}

/// Active pools indexed by token.
struct PoolGraph {
    pools: Vec<PoolRecord>,
    by_token: HashMap<String, Vec<usize>>,
}

impl PoolGraph {
    fn new(mut pools: Vec<PoolRecord>) -> Self {
        // Deepest first, so every per-token list is ordered by liquidity.
        pools.sort_by_key(|p| std::cmp::Reverse(p.liquidity_u128()));
        let mut by_token: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, pool) in pools.iter().enumerate() {
            by_token.entry(pool.token0.clone()).or_default().push(i);
            by_token.entry(pool.token1.clone()).or_default().push(i);
        }
        Self { pools, by_token }
    }

    fn pools_of(&self, token: &str) -> impl Iterator<Item = &PoolRecord> {
        self.by_token
            .get(token)
            .into_iter()
            .flatten()
            .map(|&i| &self.pools[i])
    }

    fn priced_neighbours(&self, token: &str, prices: &HashMap<String, Decimal>) -> usize {
        self.pools_of(token)
            .filter_map(|pool| pool.counterpart(token))
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|other| prices.contains_key(*other))
            .count()
    }
}

/// Price of `token` in units of the other token of `pool`.
fn relative_price(pool: &PoolRecord, token: &str, decimals: &HashMap<String, u8>) -> Option<Decimal> {
    let sqrt = pool.sqrt_price()?;
    let d0 = *decimals.get(&pool.token0)?;
    let d1 = *decimals.get(&pool.token1)?;
    if pool.token0 == token {
        sqrt_price_x96_to_price(sqrt, d0, d1)
    } else if pool.token1 == token {
        sqrt_price_x96_to_inverse_price(sqrt, d0, d1)
    } else {
        None
    }
}

/// Liquidity-weighted mean; plain mean when every weight is zero.
fn weighted_average(quotes: &[(u128, Decimal)]) -> Option<Decimal> {
    if quotes.is_empty() {
        return None;
    }
    let total = quotes
        .iter()
        .fold(U512::ZERO, |acc, (liquidity, _)| acc + U512::from(*liquidity));

    if total.is_zero() {
        let sum = quotes
            .iter()
            .try_fold(Decimal::ZERO, |acc, (_, price)| acc.checked_add(*price))?;
        return sum.checked_div(Decimal::from(quotes.len()));
    }

    quotes.iter().try_fold(Decimal::ZERO, |acc, (liquidity, price)| {
        let weight = ratio_to_decimal(U512::from(*liquidity), total, 0)?;
        acc.checked_add(price.checked_mul(weight)?)
    })
}

fn percent_change(current: Decimal, previous: Decimal) -> Option<Decimal> {
    if previous.is_zero() {
        return None;
    }
    current
        .checked_sub(previous)?
        .checked_div(previous)?
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|d| d.round_dp(8))
}

fn to_stored(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Resolves USD prices for every pooled token and writes statistics.
pub struct PriceResolutionEngine {
    storage: Arc<dyn StorageGateway>,
    oracle: Arc<dyn PriceOracleGateway>,
}

impl std::fmt::Debug for PriceResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceResolutionEngine").finish_non_exhaustive()
    }
}

impl PriceResolutionEngine {
    /// Creates an engine over storage and the oracle.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageGateway>, oracle: Arc<dyn PriceOracleGateway>) -> Self {
        Self { storage, oracle }
    }

    /// Run one cycle at the current time.
    ///
    /// # Errors
    ///
    /// Storage failures abort the cycle. Oracle failures never do.
    pub async fn run_cycle(&self) -> IndexerResult<CycleReport> {
        self.run_cycle_at(now_ts()).await
    }

    /// Run one cycle as if the clock read `now`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run_cycle`].
    #[instrument(skip(self), fields(priced = tracing::field::Empty, unpriced = tracing::field::Empty))]
    pub async fn run_cycle_at(&self, now: i64) -> IndexerResult<CycleReport> {
        let tokens = self.storage.list_pooled_tokens().await?;
        let graph = PoolGraph::new(self.storage.list_active_pools().await?);
        let decimals: HashMap<String, u8> = tokens
            .iter()
            .map(|t| (t.address.clone(), t.decimals_u8()))
            .collect();

        let mut state = CycleState::default();
        self.seed(&tokens, &mut state).await;
        Self::resolve(&tokens, &graph, &decimals, &mut state);
        Self::search_paths(&tokens, &graph, &decimals, &mut state);

        let mut unpriced: Vec<String> = tokens
            .iter()
            .filter(|t| !state.prices.contains_key(&t.address))
            .map(|t| t.address.clone())
            .collect();
        unpriced.sort();
        if !unpriced.is_empty() {
            warn!(count = unpriced.len(), tokens = ?unpriced, "Tokens left unpriced");
        }

        let token_stats = self.token_statistics(&tokens, &state, now).await?;
        let pool_stats = self.pool_statistics(&graph, &decimals, &state, now).await?;
        self.storage.insert_token_statistics(&token_stats).await?;
        self.storage.insert_pool_statistics(&pool_stats).await?;

        let span = tracing::Span::current();
        span.record("priced", state.prices.len());
        span.record("unpriced", unpriced.len());
        info!(
            tokens = tokens.len(),
            priced = state.prices.len(),
            passes = state.passes,
            oracle_backoff = state.oracle_backoff,
            "Price cycle complete"
        );

        Ok(CycleReport {
            tokens: tokens.len(),
            unpriced,
            passes: state.passes,
            oracle_backoff: state.oracle_backoff,
            token_statistics: token_stats.len(),
            pool_statistics: pool_stats.len(),
            prices: state.prices,
            sources: state.sources,
        })
    }

    async fn seed(&self, tokens: &[TokenRecord], state: &mut CycleState) {
        let reference: Vec<&TokenRecord> = tokens.iter().filter(|t| t.is_reference()).collect();
        if reference.is_empty() {
            return;
        }

        let mut ids: Vec<String> = reference
            .iter()
            .filter_map(|t| t.coingecko_id.clone())
            .collect();
        ids.sort();
        ids.dedup();

        let quotes = match self.oracle.get_prices(&ids).await {
            Ok(quotes) => quotes,
            Err(e @ IndexerError::RateLimited { .. }) => {
                warn!(error = %e, "Oracle rate limited, backing off for this cycle");
                state.oracle_backoff = true;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Oracle unavailable, falling back to pool pricing");
                state.oracle_backoff = true;
                return;
            }
        };

        for token in reference {
            let price = token.coingecko_id.as_ref().and_then(|id| quotes.get(id));
            match price {
                Some(price) => state.set(token.address.clone(), *price, PriceSource::Oracle),
                None => debug!(token = %token.symbol, "No oracle quote, deriving from pools"),
            }
        }
        debug!(seeded = state.prices.len(), "Oracle seed complete");
    }

    fn resolve(
        tokens: &[TokenRecord],
        graph: &PoolGraph,
        decimals: &HashMap<String, u8>,
        state: &mut CycleState,
    ) {
        for pass in 1..=MAX_PASSES {
            let mut unpriced: Vec<(usize, &str)> = tokens
                .iter()
                .map(|t| t.address.as_str())
                .filter(|t| !state.prices.contains_key(*t))
                .map(|t| (graph.priced_neighbours(t, &state.prices), t))
                .collect();
            if unpriced.is_empty() {
                break;
            }
            state.passes = pass;
            unpriced.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

            let mut progress = 0;
            for batch in unpriced.chunks(BATCH_SIZE) {
                let snapshot = state.prices.clone();
                let resolved: Vec<(String, Decimal)> = batch
                    .iter()
                    .filter_map(|(_, token)| {
                        Self::price_from_pools(token, graph, decimals, &snapshot)
                            .map(|price| ((*token).to_string(), price))
                    })
                    .collect();
                progress += resolved.len();
                for (token, price) in resolved {
                    state.set(token, price, PriceSource::Pool { pass });
                }
            }

            debug!(pass, resolved = progress, remaining = unpriced.len() - progress, "Resolution pass");
            if progress == 0 {
                break;
            }
        }
    }

    fn price_from_pools(
        token: &str,
        graph: &PoolGraph,
        decimals: &HashMap<String, u8>,
        prices: &HashMap<String, Decimal>,
    ) -> Option<Decimal> {
        let quotes: Vec<(u128, Decimal)> = graph
            .pools_of(token)
            .filter_map(|pool| {
                let counterpart_usd = prices.get(pool.counterpart(token)?)?;
                let relative = relative_price(pool, token, decimals)?;
                Some((pool.liquidity_u128(), relative.checked_mul(*counterpart_usd)?))
            })
            .take(TOP_POOLS)
            .collect();

        weighted_average(&quotes).filter(|price| *price > Decimal::ZERO)
    }

    fn search_paths(
        tokens: &[TokenRecord],
        graph: &PoolGraph,
        decimals: &HashMap<String, u8>,
        state: &mut CycleState,
    ) {
        let found: Vec<(String, Decimal, usize)> = tokens
            .iter()
            .filter(|t| !state.prices.contains_key(&t.address))
            .filter_map(|t| {
                Self::path_price(&t.address, graph, decimals, &state.prices)
                    .map(|(price, hops)| (t.address.clone(), price, hops))
            })
            .collect();

        for (token, price, hops) in found {
            debug!(token = %token, hops, "Priced through pool path");
            state.set(token, price, PriceSource::Path { hops });
        }
    }

    /// Breadth-first walk through priceable pools until a priced token is hit.
    fn path_price(
        token: &str,
        graph: &PoolGraph,
        decimals: &HashMap<String, u8>,
        prices: &HashMap<String, Decimal>,
    ) -> Option<(Decimal, usize)> {
        let mut queue = VecDeque::from([(token.to_string(), Decimal::ONE, 0_usize)]);
        let mut seen = HashSet::from([token.to_string()]);

        while let Some((node, rate, depth)) = queue.pop_front() {
            if depth >= MAX_PATH_DEPTH {
                continue;
            }
            for pool in graph.pools_of(&node) {
                let Some(next) = pool.counterpart(&node) else {
                    continue;
                };
                if seen.contains(next) {
                    continue;
                }
                let Some(next_rate) =
                    relative_price(pool, &node, decimals).and_then(|step| rate.checked_mul(step))
                else {
                    continue;
                };
                if let Some(usd) = prices.get(next) {
                    return next_rate
                        .checked_mul(*usd)
                        .filter(|price| *price > Decimal::ZERO)
                        .map(|price| (price, depth + 1));
                }
                seen.insert(next.to_string());
                queue.push_back((next.to_string(), next_rate, depth + 1));
            }
        }
        None
    }

    async fn token_statistics(
        &self,
        tokens: &[TokenRecord],
        state: &CycleState,
        now: i64,
    ) -> IndexerResult<Vec<TokenStatistic>> {
        let mut history: HashMap<String, Vec<TokenStatistic>> = HashMap::new();
        for stat in self.storage.token_statistics_since(now - DAY - HOUR).await? {
            history.entry(stat.token_address.clone()).or_default().push(stat);
        }

        let mut stats = Vec::new();
        for token in tokens {
            let Some(price) = state.prices.get(&token.address).copied() else {
                continue;
            };

            let volume = self
                .storage
                .token_swap_amounts_since(&token.address, now - DAY)
                .await?
                .iter()
                .map(|raw| raw_amount_to_decimal(raw, token.decimals_u8()).abs())
                .try_fold(Decimal::ZERO, Decimal::checked_add)
                .unwrap_or(Decimal::MAX);
            let volume_usd = volume.checked_mul(price).unwrap_or(Decimal::MAX);

            let rows = history.get(&token.address).map(Vec::as_slice).unwrap_or_default();
            let change_1h = self.change_since(&token.address, rows, price, now - HOUR).await?;
            let change_24h = self.change_since(&token.address, rows, price, now - DAY).await?;

            stats.push(TokenStatistic {
                token_address: token.address.clone(),
                price_usd: to_stored(price),
                price_change_1h: change_1h.map(to_stored),
                price_change_24h: change_24h.map(to_stored),
                volume_24h: to_stored(volume),
                volume_24h_usd: to_stored(volume_usd),
                created_at: now,
            });
        }
        Ok(stats)
    }

    /// Percent change against the newest statistic at or before `at`.
    async fn change_since(
        &self,
        token: &str,
        history: &[TokenStatistic],
        price: Decimal,
        at: i64,
    ) -> IndexerResult<Option<Decimal>> {
        let previous = match history.iter().rev().find(|s| s.created_at <= at) {
            Some(stat) => Some(stat.clone()),
            None => self.storage.token_statistic_at_or_before(token, at).await?,
        };
        Ok(previous
            .and_then(|stat| stat.price())
            .and_then(|old| percent_change(price, old)))
    }

    async fn pool_statistics(
        &self,
        graph: &PoolGraph,
        decimals: &HashMap<String, u8>,
        state: &CycleState,
        now: i64,
    ) -> IndexerResult<Vec<PoolStatistic>> {
        let mut stats = Vec::new();
        for pool in &graph.pools {
            let (Some(price0), Some(price1)) =
                (state.prices.get(&pool.token0), state.prices.get(&pool.token1))
            else {
                continue;
            };
            let (Some(&d0), Some(&d1)) = (decimals.get(&pool.token0), decimals.get(&pool.token1))
            else {
                continue;
            };

            let tvl = pool.sqrt_price().map_or(Decimal::ZERO, |sqrt| {
                let reserves = liquidity_to_amounts(
                    pool.liquidity_u128(),
                    sqrt,
                    MIN_SQRT_RATIO,
                    MAX_SQRT_RATIO,
                    d0,
                    d1,
                );
                reserves
                    .amount0
                    .checked_mul(*price0)
                    .and_then(|a| a.checked_add(reserves.amount1.checked_mul(*price1)?))
                    .unwrap_or(Decimal::ZERO)
            });

            let volume_usd = self
                .storage
                .pool_swap_amounts_since(&pool.address, now - DAY)
                .await?
                .iter()
                .map(|row| raw_amount_to_decimal(&row.amount0, d0).abs())
                .try_fold(Decimal::ZERO, Decimal::checked_add)
                .and_then(|volume| volume.checked_mul(*price0))
                .unwrap_or(Decimal::ZERO);

            let fee_rate = Decimal::from(pool.fee) / Decimal::from(1_000_000);
            let fees = volume_usd.checked_mul(fee_rate).unwrap_or(Decimal::ZERO);
            let apr = if tvl > Decimal::ZERO {
                fees.checked_mul(Decimal::from(365))
                    .and_then(|yearly| yearly.checked_div(tvl))
                    .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
                    .unwrap_or(Decimal::ZERO)
            } else {
                Decimal::ZERO
            };

            stats.push(PoolStatistic {
                pool_address: pool.address.clone(),
                tvl_usd: to_stored(tvl.round_dp(8)),
                volume_24h_usd: to_stored(volume_usd.round_dp(8)),
                fees_24h_usd: to_stored(fees.round_dp(8)),
                apr: to_stored(apr.round_dp(4)),
                created_at: now,
            });
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("decimal")
    }

    #[test]
    fn test_weighted_average_by_liquidity() {
        let quotes = [(3_u128, dec("10")), (1, dec("20"))];
        assert_eq!(weighted_average(&quotes), Some(dec("12.5")));
    }

    #[test]
    fn test_weighted_average_zero_liquidity_is_plain_mean() {
        let quotes = [(0_u128, dec("10")), (0, dec("20"))];
        assert_eq!(weighted_average(&quotes), Some(dec("15")));
        assert_eq!(weighted_average(&[]), None);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(dec("110"), dec("100")), Some(dec("10")));
        assert_eq!(percent_change(dec("90"), dec("100")), Some(dec("-10")));
        assert_eq!(percent_change(dec("1"), Decimal::ZERO), None);
    }

    #[test]
    fn test_price_source_serializes_with_tag() {
        let json = serde_json::to_value(PriceSource::Pool { pass: 2 }).expect("json");
        assert_eq!(json["source"], "pool");
        assert_eq!(json["pass"], 2);
    }
}
