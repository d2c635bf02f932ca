mod series_queries;

pub use series_queries::{slice, yearly_energy_totals, yearly_summary, YearlyEnergyTotals, YearlySummary};
