pub mod domain;
pub mod query;
pub mod row;

pub use domain::{
    ConsumptionRecord, DerivedPriceRecord, HouseholdEnergyRecord, IntervalRecord, LossProfileRecord,
    MeterEnergyRecord, MeterSample, PriceRecord, Timestamped,
};
pub use row::{CsvRow, RowError};
