pub mod canonical_csv;

pub use canonical_csv::CanonicalSeriesSink;
