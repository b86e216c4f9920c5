//! Feature engineering pipeline.
//!
//! Fit mode learns a [`PreprocessorState`] from a training batch; apply mode
//! replays the same sub-stages for one transaction against the frozen state.
//! For a training row carrying its `row_index`, apply reproduces the fit
//! output exactly.

use crate::error::{ScoringError, ScoringResult};
use crate::features::row::{projection_input_columns, EngineeredFeatureRow, ENGINEERED_COLUMNS};
use crate::features::state::{
    AccountProfiles, FrequencyEncoders, HistoryEntry, PreprocessorState, Projection, RobustScaler,
    DEFAULT_NEW_MERCHANT_THRESHOLD, STATE_VERSION,
};
use crate::features::synthetic::{SyntheticPopulation, DEVICE_TYPES};
use crate::models::loader::read_json;
use crate::types::RawTransaction;
use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::Array2;
use std::path::Path;
use tracing::{debug, info};

/// 2024-01-01T00:00:00Z, the origin of the `Time` offset.
const EPOCH_SECS: i64 = 1_704_067_200;

/// How [`transform`] should treat its input rows.
#[derive(Debug, Clone, Copy)]
pub enum TransformMode<'a> {
    /// Learn fresh preprocessing state from the whole batch.
    Fit { seed: u64 },
    /// Reuse frozen state on exactly one row.
    Apply(&'a FeaturePipeline),
}

/// Run the pipeline in either mode, returning engineered rows and the state used.
pub fn transform(
    rows: &[RawTransaction],
    mode: TransformMode<'_>,
) -> ScoringResult<(Vec<EngineeredFeatureRow>, PreprocessorState)> {
    match mode {
        TransformMode::Fit { seed } => {
            let (pipeline, engineered) = FeaturePipeline::fit(rows, seed)?;
            Ok((engineered, pipeline.into_state()))
        }
        TransformMode::Apply(pipeline) => {
            let [row] = rows else {
                return Err(ScoringError::SingleRowRequired { rows: rows.len() });
            };
            let engineered = pipeline.apply(row)?;
            Ok((vec![engineered], pipeline.state().clone()))
        }
    }
}

/// Frozen preprocessing state plus the synthetic population it was fitted with.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    state: PreprocessorState,
    population: SyntheticPopulation,
}

impl FeaturePipeline {
    /// Load and validate `preprocessors.json`.
    pub fn load(path: &Path) -> ScoringResult<Self> {
        let state: PreprocessorState = read_json(path)?;
        let pipeline = Self::build(state, path)?;
        info!(
            path = %path.display(),
            seed = pipeline.state.seed,
            accounts = pipeline.state.profiles.history.len(),
            "Loaded preprocessor state"
        );
        Ok(pipeline)
    }

    pub fn from_state(state: PreprocessorState) -> ScoringResult<Self> {
        Self::build(state, Path::new("<preprocessor state>"))
    }

    fn build(state: PreprocessorState, path: &Path) -> ScoringResult<Self> {
        state.validate(path)?;
        let population = SyntheticPopulation::new(state.seed)
            .map_err(|e| ScoringError::schema(path, format!("synthetic population: {e}")))?;
        Ok(Self { state, population })
    }

    pub fn state(&self) -> &PreprocessorState {
        &self.state
    }

    pub fn into_state(self) -> PreprocessorState {
        self.state
    }

    /// Fit every preprocessor on `rows` and engineer the whole batch.
    ///
    /// A row without `row_index` takes its position in the batch.
    pub fn fit(
        rows: &[RawTransaction],
        seed: u64,
    ) -> ScoringResult<(Self, Vec<EngineeredFeatureRow>)> {
        if rows.is_empty() {
            return Err(ScoringError::EmptyBatch);
        }
        let population = SyntheticPopulation::new(seed).map_err(|e| {
            ScoringError::schema("<synthetic population>", e.to_string())
        })?;

        let indices: Vec<u64> = rows
            .iter()
            .enumerate()
            .map(|(i, raw)| raw.row_index.unwrap_or(i as u64))
            .collect();
        let resolved: Vec<ResolvedIds> = rows
            .iter()
            .zip(&indices)
            .map(|(raw, &idx)| ResolvedIds::resolve(raw, &population, idx))
            .collect();

        let amounts: Vec<f64> = rows.iter().map(|raw| raw.amount).collect();
        let scaler = RobustScaler::fit(&amounts);

        let mut encoders = FrequencyEncoders::default();
        for ids in &resolved {
            FrequencyEncoders::observe(&mut encoders.merchant_id, ids.merchant.id);
            FrequencyEncoders::observe(&mut encoders.device_type, ids.device.id);
            FrequencyEncoders::observe(&mut encoders.geo_bucket, ids.geo.id);
            FrequencyEncoders::observe(&mut encoders.account_id, ids.account.id);
        }

        let profiles = AccountProfiles::from_entries(
            rows.iter()
                .zip(&indices)
                .zip(&resolved)
                .filter_map(|((raw, &row_index), ids)| {
                    ids.account.id.map(|account| {
                        (
                            account,
                            HistoryEntry {
                                time: raw.time,
                                row_index,
                                amount: raw.amount,
                            },
                        )
                    })
                }),
        );

        let mut engineered = Vec::with_capacity(rows.len());
        for ((raw, &idx), ids) in rows.iter().zip(&indices).zip(&resolved) {
            let window = ids.window(&profiles, raw.time, idx);
            engineered.push(base_columns(
                raw,
                ids,
                &scaler,
                &encoders,
                DEFAULT_NEW_MERCHANT_THRESHOLD,
                window,
            )?);
        }

        let input_columns = projection_input_columns();
        let mut matrix = Vec::with_capacity(engineered.len());
        for row in &engineered {
            matrix.push(select_projection_inputs(row, &input_columns)?);
        }
        let data = Array2::from_shape_fn((matrix.len(), input_columns.len()), |(i, j)| {
            matrix[i][j]
        });
        let projection = Projection::fit(input_columns, &data);

        for (row, inputs) in engineered.iter_mut().zip(&matrix) {
            let [x, y] = projection.project(inputs);
            row.insert("pca_x", x);
            row.insert("pca_y", y);
        }

        info!(
            rows = rows.len(),
            seed,
            merchants = encoders.merchant_id.len(),
            accounts = profiles.history.len(),
            amount_center = scaler.center,
            amount_scale = scaler.scale,
            "Fitted preprocessors"
        );

        let state = PreprocessorState {
            version: STATE_VERSION,
            seed,
            scaler,
            encoders,
            profiles,
            projection,
            new_merchant_threshold: DEFAULT_NEW_MERCHANT_THRESHOLD,
        };

        Ok((Self { state, population }, engineered))
    }

    /// Engineer one transaction against the frozen state.
    ///
    /// Pure in (`raw`, state): no randomness beyond the seeded population.
    pub fn apply(&self, raw: &RawTransaction) -> ScoringResult<EngineeredFeatureRow> {
        let index = raw.row_index.unwrap_or_else(|| raw.fingerprint());
        let position = raw.row_index.unwrap_or(u64::MAX);

        let ids = ResolvedIds::resolve(raw, &self.population, index);
        let window = ids.window(&self.state.profiles, raw.time, position);

        let mut row = base_columns(
            raw,
            &ids,
            &self.state.scaler,
            &self.state.encoders,
            self.state.new_merchant_threshold,
            window,
        )?;

        let projection = &self.state.projection;
        let inputs = select_projection_inputs(&row, &projection.input_columns)?;
        let [x, y] = projection.project(&inputs);
        row.insert("pca_x", x);
        row.insert("pca_y", y);

        debug!(
            row_index = ?raw.row_index,
            account = ?ids.account.id,
            columns = row.len(),
            "Engineered transaction"
        );
        Ok(row)
    }
}

/// One categorical column: the value written to the row plus the id it resolves to.
#[derive(Debug, Clone, Copy)]
struct Slot {
    value: f64,
    id: Option<u32>,
}

impl Slot {
    fn drawn(id: u32) -> Self {
        Self {
            value: id as f64,
            id: Some(id),
        }
    }

    /// Caller-supplied value; resolves only for integral ids below `limit`.
    fn supplied(value: f64, limit: u32) -> Self {
        let valid = value >= 0.0 && value.fract() == 0.0 && value < limit as f64;
        Self {
            value,
            id: valid.then_some(value as u32),
        }
    }

    fn pick(supplied: Option<f64>, drawn: u32, limit: u32) -> Self {
        match supplied {
            Some(value) => Self::supplied(value, limit),
            None => Self::drawn(drawn),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedIds {
    merchant: Slot,
    device: Slot,
    geo: Slot,
    account: Slot,
    account_age: Option<u32>,
}

impl ResolvedIds {
    fn resolve(raw: &RawTransaction, population: &SyntheticPopulation, index: u64) -> Self {
        let drawn = population.draw(index);
        let ids = raw.identifiers;

        let merchant = Slot::pick(ids.merchant_id, drawn.merchant_id, u32::MAX);
        let device = Slot::pick(ids.device_type, drawn.device_type, DEVICE_TYPES.len() as u32);
        let geo = Slot::pick(ids.geo_bucket, drawn.geo_bucket, u32::MAX);
        let account = Slot::pick(ids.account_id, drawn.account_id, u32::MAX);
        let account_age = account.id.and_then(|id| population.account_age(id));

        Self {
            merchant,
            device,
            geo,
            account,
            account_age,
        }
    }

    fn window(&self, profiles: &AccountProfiles, time: f64, position: u64) -> (f64, f64) {
        self.account
            .id
            .map(|account| profiles.window(account, time, position))
            .unwrap_or((0.0, 0.0))
    }
}

/// Every engineered column except the projection, in schema order.
fn base_columns(
    raw: &RawTransaction,
    ids: &ResolvedIds,
    scaler: &RobustScaler,
    encoders: &FrequencyEncoders,
    new_merchant_threshold: f64,
    (last_5_mean, last_5_count): (f64, f64),
) -> ScoringResult<EngineeredFeatureRow> {
    let mut row = EngineeredFeatureRow::with_capacity(ENGINEERED_COLUMNS.len());
    for (name, value) in raw.raw_columns() {
        row.insert(name, value);
    }

    let (hour, dayofweek) = timestamp_features(raw.time)?;
    row.insert("hour", hour);
    row.insert("dayofweek", dayofweek);

    row.insert("amount_log", raw.amount.ln_1p());
    row.insert("amount_scaled", scaler.transform(raw.amount));

    row.insert("merchant_id", ids.merchant.value);
    row.insert("device_type", ids.device.value);
    row.insert("geo_bucket", ids.geo.value);
    row.insert("account_id", ids.account.value);
    let account_age = ids.account_age.map(f64::from).unwrap_or(0.0);
    row.insert("account_age_days", account_age);

    let merchant_freq = FrequencyEncoders::count(&encoders.merchant_id, ids.merchant.id);
    let device_freq = FrequencyEncoders::count(&encoders.device_type, ids.device.id);
    let geo_freq = FrequencyEncoders::count(&encoders.geo_bucket, ids.geo.id);
    let account_count = FrequencyEncoders::count(&encoders.account_id, ids.account.id);
    row.insert("merchant_freq", merchant_freq);
    row.insert("device_freq", device_freq);
    row.insert("account_txn_count", account_count);

    row.insert("last_5_mean_amount", last_5_mean);
    row.insert("last_5_count", last_5_count);

    row.insert("merchant_id_missing", flag(ids.merchant.id.is_none()));
    row.insert("device_type_missing", flag(ids.device.id.is_none()));
    row.insert("geo_bucket_missing", flag(ids.geo.id.is_none()));
    row.insert("account_age_days_missing", flag(ids.account_age.is_none()));

    row.insert("merchant_id_fe", merchant_freq);
    row.insert("device_type_fe", device_freq);
    row.insert("geo_bucket_fe", geo_freq);
    row.insert("account_id_fe", account_count);

    row.insert("amount_times_age", raw.amount * account_age);
    row.insert("is_new_merchant", flag(merchant_freq < new_merchant_threshold));

    Ok(row)
}

/// Hour of day and day of week (0 = Monday) of `Time` seconds after the epoch.
fn timestamp_features(time: f64) -> ScoringResult<(f64, f64)> {
    let secs = time.floor();
    let nanos = ((time - secs) * 1e9).min(999_999_999.0) as u32;
    let stamp = (secs.abs() < i64::MAX as f64 / 2.0)
        .then(|| EPOCH_SECS.checked_add(secs as i64))
        .flatten()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, nanos))
        .ok_or_else(|| {
            ScoringError::invalid_input("Time", format!("offset {time} is out of range"))
        })?;

    Ok((
        f64::from(stamp.hour()),
        f64::from(stamp.weekday().num_days_from_monday()),
    ))
}

fn select_projection_inputs(
    row: &EngineeredFeatureRow,
    columns: &[String],
) -> ScoringResult<Vec<f64>> {
    row.select(columns).map_err(|missing| ScoringError::ContractViolation {
        missing,
        extra: Vec::new(),
    })
}

fn flag(set: bool) -> f64 {
    if set {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::training_batch;
    use crate::types::Identifiers;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-8 + 1e-6 * b.abs()
    }

    #[test]
    fn test_fit_emits_full_schema() {
        let rows = training_batch(32);
        let (_, engineered) = FeaturePipeline::fit(&rows, 42).unwrap();

        assert_eq!(engineered.len(), 32);
        for row in &engineered {
            assert_eq!(row.columns(), ENGINEERED_COLUMNS);
        }
    }

    #[test]
    fn test_apply_reproduces_fit_for_training_rows() {
        let rows = training_batch(48);
        let (pipeline, fitted) = FeaturePipeline::fit(&rows, 42).unwrap();

        for (i, (raw, expected)) in rows.iter().zip(&fitted).enumerate() {
            let applied = pipeline
                .apply(&raw.clone().with_row_index(i as u64))
                .unwrap();
            assert_eq!(applied.columns(), expected.columns());
            for ((name, a), (_, b)) in applied.iter().zip(expected.iter()) {
                assert!(close(a, b), "row {i} column {name}: {a} != {b}");
            }
        }
    }

    #[test]
    fn test_transform_modes() {
        let rows = training_batch(8);
        let (engineered, state) = transform(&rows, TransformMode::Fit { seed: 7 }).unwrap();
        assert_eq!(engineered.len(), 8);
        assert_eq!(state.seed, 7);

        let pipeline = FeaturePipeline::from_state(state).unwrap();
        let (single, _) = transform(&rows[..1], TransformMode::Apply(&pipeline)).unwrap();
        assert_eq!(single.len(), 1);

        match transform(&rows[..2], TransformMode::Apply(&pipeline)) {
            Err(ScoringError::SingleRowRequired { rows }) => assert_eq!(rows, 2),
            other => panic!("expected SingleRowRequired, got {other:?}"),
        }
        assert!(matches!(
            transform(&[], TransformMode::Fit { seed: 7 }),
            Err(ScoringError::EmptyBatch)
        ));
    }

    #[test]
    fn test_timestamp_features_from_epoch() {
        // 2024-01-01 is a Monday
        assert_eq!(timestamp_features(0.0).unwrap(), (0.0, 0.0));
        assert_eq!(timestamp_features(25.0 * 3600.0 + 59.5).unwrap(), (1.0, 1.0));
        assert_eq!(timestamp_features(6.0 * 86_400.0 + 23.0 * 3600.0).unwrap(), (23.0, 6.0));
        assert!(timestamp_features(1e300).is_err());
    }

    #[test]
    fn test_unseen_identifiers_encode_to_zero() {
        let rows = training_batch(16);
        let (pipeline, _) = FeaturePipeline::fit(&rows, 42).unwrap();

        let raw = RawTransaction::new(100.0, 10.0).with_identifiers(Identifiers {
            merchant_id: Some(999_999.0),
            ..Identifiers::default()
        });
        let row = pipeline.apply(&raw).unwrap();

        assert_eq!(row.get("merchant_id"), Some(999_999.0));
        assert_eq!(row.get("merchant_freq"), Some(0.0));
        assert_eq!(row.get("merchant_id_fe"), Some(0.0));
        assert_eq!(row.get("merchant_id_missing"), Some(0.0));
        assert_eq!(row.get("is_new_merchant"), Some(1.0));
    }

    #[test]
    fn test_unresolvable_identifiers_are_flagged() {
        let rows = training_batch(16);
        let (pipeline, _) = FeaturePipeline::fit(&rows, 42).unwrap();

        let raw = RawTransaction::new(100.0, 10.0).with_identifiers(Identifiers {
            device_type: Some(7.0),
            account_id: Some(-1.0),
            geo_bucket: Some(2.5),
            ..Identifiers::default()
        });
        let row = pipeline.apply(&raw).unwrap();

        assert_eq!(row.get("device_type"), Some(7.0));
        assert_eq!(row.get("device_type_missing"), Some(1.0));
        assert_eq!(row.get("device_freq"), Some(0.0));
        assert_eq!(row.get("geo_bucket_missing"), Some(1.0));
        assert_eq!(row.get("account_age_days"), Some(0.0));
        assert_eq!(row.get("account_age_days_missing"), Some(1.0));
        assert_eq!(row.get("amount_times_age"), Some(0.0));
        assert_eq!(row.get("last_5_count"), Some(0.0));
    }

    #[test]
    fn test_rolling_window_sees_only_prior_rows() {
        let rows: Vec<RawTransaction> = (0..8)
            .map(|i| {
                RawTransaction::new(i as f64 * 60.0, (i + 1) as f64).with_identifiers(
                    Identifiers {
                        account_id: Some(5.0),
                        ..Identifiers::default()
                    },
                )
            })
            .collect();
        let (pipeline, fitted) = FeaturePipeline::fit(&rows, 42).unwrap();

        assert_eq!(fitted[0].get("last_5_count"), Some(0.0));
        assert_eq!(fitted[0].get("last_5_mean_amount"), Some(0.0));
        assert_eq!(fitted[2].get("last_5_count"), Some(0.0));
        assert_eq!(fitted[2].get("last_5_mean_amount"), Some(0.0));
        assert_eq!(fitted[4].get("last_5_count"), Some(0.0));
        assert_eq!(fitted[5].get("last_5_count"), Some(5.0));
        assert_eq!(fitted[5].get("last_5_mean_amount"), Some(3.0));
        assert_eq!(fitted[6].get("last_5_count"), Some(5.0));
        assert_eq!(fitted[6].get("last_5_mean_amount"), Some(4.0));
        assert_eq!(fitted[6].get("account_txn_count"), Some(8.0));

        // A live transaction after the batch sees the last five training amounts
        let live = RawTransaction::new(1_000.0, 50.0).with_identifiers(Identifiers {
            account_id: Some(5.0),
            ..Identifiers::default()
        });
        let row = pipeline.apply(&live).unwrap();
        assert_eq!(row.get("last_5_count"), Some(5.0));
        assert_eq!(row.get("last_5_mean_amount"), Some(6.0));
    }

    #[test]
    fn test_state_survives_serialization() {
        let rows = training_batch(12);
        let (pipeline, _) = FeaturePipeline::fit(&rows, 42).unwrap();

        let json = serde_json::to_string(pipeline.state()).unwrap();
        let state: PreprocessorState = serde_json::from_str(&json).unwrap();
        let reloaded = FeaturePipeline::from_state(state).unwrap();

        let raw = rows[3].clone().with_row_index(3);
        let before = pipeline.apply(&raw).unwrap();
        let after = reloaded.apply(&raw).unwrap();
        for ((name, a), (_, b)) in before.iter().zip(after.iter()) {
            assert!(close(a, b), "column {name}: {a} != {b}");
        }
    }

    proptest! {
        #[test]
        fn prop_apply_is_idempotent(
            time in 0.0f64..172_800.0,
            amount in 0.0f64..25_000.0,
            v14 in -20.0f64..20.0,
            row_index in proptest::option::of(0u64..100_000),
        ) {
            let pipeline = crate::test_support::fitted_pipeline();
            let mut raw = RawTransaction::new(time, amount).with_component(14, v14);
            raw.row_index = row_index;

            let first = pipeline.apply(&raw).unwrap();
            let second = pipeline.apply(&raw).unwrap();
            prop_assert_eq!(first.columns(), ENGINEERED_COLUMNS);
            prop_assert_eq!(first, second);
        }
    }
}
