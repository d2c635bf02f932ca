mod consumption;
mod derived_price;
mod interval;
mod loss_profile;
mod meter;
mod price;

pub use consumption::ConsumptionRecord;
pub use derived_price::DerivedPriceRecord;
pub use interval::{floor_to_quarter, is_quarter_aligned, IntervalRecord, Timestamped, QUARTER_HOUR, SLOTS_PER_DAY};
pub use loss_profile::LossProfileRecord;
pub use meter::{HouseholdEnergyRecord, MeterEnergyRecord, MeterSample};
pub use price::PriceRecord;
