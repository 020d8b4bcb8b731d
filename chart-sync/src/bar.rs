//! Bar Store: the single source of truth for candle data.
//!
//! Bars are kept strictly increasing in time. Only the last bar may be
//! revised in place; anything older than it is stale.

use crate::{
    error::ChartError,
    types::{Bar, UnixTime},
};
use serde::{Deserialize, Serialize};

/// Result of [`BarStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UpsertOutcome {
    /// A new bar was appended
    Appended,
    /// The still-forming last bar was revised
    Replaced,
}

/// Ordered, time-indexed sequence of OHLC bars
#[derive(Debug, Clone, Default)]
pub struct BarStore {
    bars: Vec<Bar>,
}

impl BarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all contents. The store is left untouched if `bars` are not
    /// strictly increasing in time or contain a malformed bar.
    pub fn load(&mut self, bars: Vec<Bar>) -> Result<(), ChartError> {
        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].time <= pair[0].time {
                return Err(ChartError::InvalidOrder {
                    index: index + 1,
                    prev: pair[0].time,
                    next: pair[1].time,
                });
            }
        }
        bars.iter().try_for_each(Bar::check)?;

        self.bars = bars;
        Ok(())
    }

    /// Append a later bar or revise the last one.
    pub fn upsert(&mut self, bar: Bar) -> Result<UpsertOutcome, ChartError> {
        bar.check()?;

        match self.bars.last_mut() {
            None => {
                self.bars.push(bar);
                Ok(UpsertOutcome::Appended)
            }
            Some(last) if bar.time == last.time => {
                *last = bar;
                Ok(UpsertOutcome::Replaced)
            }
            Some(last) if bar.time > last.time => {
                self.bars.push(bar);
                Ok(UpsertOutcome::Appended)
            }
            Some(last) => Err(ChartError::OutOfOrderUpdate {
                last: last.time,
                received: bar.time,
            }),
        }
    }

    /// The most recent `n` bars in time order
    pub fn last_n(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// Bars with `from <= time <= to`
    pub fn range(&self, from: UnixTime, to: UnixTime) -> &[Bar] {
        if from > to {
            return &[];
        }
        let start = self.bars.partition_point(|b| b.time < from);
        let end = self.bars.partition_point(|b| b.time <= to);
        &self.bars[start..end]
    }

    pub fn get(&self, time: UnixTime) -> Option<&Bar> {
        self.bars
            .binary_search_by_key(&time, |b| b.time)
            .ok()
            .map(|index| &self.bars[index])
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_time(&self) -> Option<UnixTime> {
        self.bars.last().map(|b| b.time)
    }

    /// Spacing between the last two bars
    pub fn interval(&self) -> Option<UnixTime> {
        match self.bars.as_slice() {
            [.., prev, last] => Some(last.time - prev.time),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: UnixTime, close: f64) -> Bar {
        Bar::new(time, close, close + 1.0, close - 1.0, close, 1.0)
    }

    fn store_with(times: &[UnixTime]) -> BarStore {
        let mut store = BarStore::new();
        store
            .load(times.iter().map(|&t| bar(t, t as f64)).collect())
            .unwrap();
        store
    }

    #[test]
    fn test_load_rejects_unordered_input() {
        struct TestCase {
            input: Vec<UnixTime>,
            expected: Option<ChartError>,
        }

        let tests = vec![
            TestCase {
                // TC0: strictly increasing
                input: vec![100, 101, 102],
                expected: None,
            },
            TestCase {
                // TC1: duplicate time
                input: vec![100, 101, 101],
                expected: Some(ChartError::InvalidOrder {
                    index: 2,
                    prev: 101,
                    next: 101,
                }),
            },
            TestCase {
                // TC2: descending pair
                input: vec![100, 99],
                expected: Some(ChartError::InvalidOrder {
                    index: 1,
                    prev: 100,
                    next: 99,
                }),
            },
            TestCase {
                // TC3: empty snapshot is valid
                input: vec![],
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut store = store_with(&[1, 2]);
            let actual = store
                .load(test.input.iter().map(|&t| bar(t, 10.0)).collect())
                .err();
            assert_eq!(actual, test.expected, "TC{} failed", index);
            if actual.is_some() {
                assert_eq!(store.len(), 2, "TC{} mutated store on failure", index);
            }
        }
    }

    #[test]
    fn test_load_rejects_malformed_bar() {
        let mut store = BarStore::new();
        let bad = Bar::new(101, 10.0, 9.0, 8.0, 10.0, 1.0);
        let result = store.load(vec![bar(100, 10.0), bad]);
        assert!(matches!(result, Err(ChartError::MalformedBar { time: 101, .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_increasing_grows_by_one() {
        let mut store = BarStore::new();
        for (i, time) in (100..110).enumerate() {
            assert_eq!(store.upsert(bar(time, 1.0)).unwrap(), UpsertOutcome::Appended);
            assert_eq!(store.len(), i + 1);
        }
        let times: Vec<_> = store.iter().map(|b| b.time).collect();
        assert_eq!(times, (100..110).collect::<Vec<_>>());
    }

    #[test]
    fn test_upsert_same_time_replaces_content_only() {
        let mut store = store_with(&[100, 101]);

        let revised = bar(101, 55.0);
        assert_eq!(store.upsert(revised).unwrap(), UpsertOutcome::Replaced);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last(), Some(&revised));
        assert_eq!(store.get(100).map(|b| b.close), Some(100.0));
    }

    #[test]
    fn test_upsert_stale_is_rejected() {
        let mut store = store_with(&[100, 101, 102]);
        let result = store.upsert(bar(101, 1.0));
        assert_eq!(
            result,
            Err(ChartError::OutOfOrderUpdate {
                last: 102,
                received: 101
            })
        );
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(101).map(|b| b.close), Some(101.0));
    }

    #[test]
    fn test_last_n_and_range() {
        let store = store_with(&[100, 160, 220, 280, 340]);

        let times = |bars: &[Bar]| bars.iter().map(|b| b.time).collect::<Vec<_>>();
        assert_eq!(times(store.last_n(2)), vec![280, 340]);
        assert_eq!(times(store.last_n(50)), vec![100, 160, 220, 280, 340]);
        assert_eq!(times(store.range(150, 280)), vec![160, 220, 280]);
        assert_eq!(times(store.range(341, 400)), Vec::<UnixTime>::new());
        assert_eq!(times(store.range(300, 200)), Vec::<UnixTime>::new());
        assert_eq!(store.interval(), Some(60));
    }
}
