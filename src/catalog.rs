//! Product catalog and reading log
//!
//! sled-backed storage with JSON values under string key prefixes. Products
//! are keyed by barcode; readings are keyed by timestamp so day/month
//! queries come back in chronological order.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const PRODUCT_PREFIX: &str = "product:";
const READING_PREFIX: &str = "reading:";

/// A cataloged product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub description: String,
}

/// One recorded read of a cataloged product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub code: String,
    pub at: DateTime<Local>,
}

/// Per-code reading totals for the stats view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingStat {
    pub code: String,
    pub description: String,
    pub total: u64,
}

/// The slice of the catalog the reader needs: membership and read recording.
pub trait ProductStore: Send + Sync {
    fn exists(&self, code: &str) -> Result<bool>;
    /// Record a read for `code`. Returns false (and writes nothing) when the
    /// code is not cataloged.
    fn record_reading(&self, code: &str) -> Result<bool>;
}

/// sled-backed catalog.
pub struct Catalog {
    db: sled::Db,
}

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("failed to open catalog database at {}", path.display()))?;
        Ok(Self { db })
    }

    fn product_key(code: &str) -> String {
        format!("{PRODUCT_PREFIX}{code}")
    }

    /// Register a product. Returns false if the code is already cataloged.
    pub fn add_product(&self, code: &str, description: &str) -> Result<bool> {
        let product = Product {
            code: code.to_string(),
            description: description.to_string(),
        };
        let value = serde_json::to_vec(&product).context("failed to serialize product")?;

        let inserted = self
            .db
            .compare_and_swap(
                Self::product_key(code).as_bytes(),
                None as Option<&[u8]>,
                Some(value),
            )
            .context("failed to write product")?
            .is_ok();

        if inserted {
            debug!("Cataloged product {}", code);
        }
        Ok(inserted)
    }

    /// Rename and/or redescribe a product. Returns false if the product does
    /// not exist or the new code collides with another product. Readings
    /// recorded under the old code are left untouched.
    pub fn update_product(&self, original: &str, new_code: &str, description: &str) -> Result<bool> {
        if self.get_product(original)?.is_none() {
            return Ok(false);
        }
        if new_code != original && self.get_product(new_code)?.is_some() {
            return Ok(false);
        }

        let product = Product {
            code: new_code.to_string(),
            description: description.to_string(),
        };
        let value = serde_json::to_vec(&product).context("failed to serialize product")?;

        let mut batch = sled::Batch::default();
        if new_code != original {
            batch.remove(Self::product_key(original).as_bytes());
        }
        batch.insert(Self::product_key(new_code).as_bytes(), value);
        self.db.apply_batch(batch).context("failed to update product")?;
        Ok(true)
    }

    /// Remove a product and every reading recorded for it.
    pub fn delete_product(&self, code: &str) -> Result<()> {
        let mut batch = sled::Batch::default();
        batch.remove(Self::product_key(code).as_bytes());

        for entry in self.db.scan_prefix(READING_PREFIX) {
            let (key, value) = entry.context("failed to scan readings")?;
            if let Ok(reading) = serde_json::from_slice::<Reading>(&value) {
                if reading.code == code {
                    batch.remove(key);
                }
            }
        }

        self.db.apply_batch(batch).context("failed to delete product")?;
        debug!("Deleted product {} and its readings", code);
        Ok(())
    }

    pub fn get_product(&self, code: &str) -> Result<Option<Product>> {
        let Some(value) = self
            .db
            .get(Self::product_key(code).as_bytes())
            .context("failed to read product")?
        else {
            return Ok(None);
        };
        let product = serde_json::from_slice(&value).context("failed to parse product")?;
        Ok(Some(product))
    }

    /// All cataloged products, ordered by code.
    pub fn products(&self) -> Result<Vec<Product>> {
        let mut products = Vec::new();
        for entry in self.db.scan_prefix(PRODUCT_PREFIX) {
            let (_, value) = entry.context("failed to scan products")?;
            let product: Product =
                serde_json::from_slice(&value).context("failed to parse product")?;
            products.push(product);
        }
        Ok(products)
    }

    /// Record a read at an explicit timestamp (tests drive the clock).
    pub fn record_reading_at(&self, code: &str, at: DateTime<Local>) -> Result<bool> {
        if self.get_product(code)?.is_none() {
            return Ok(false);
        }

        let reading = Reading {
            code: code.to_string(),
            at,
        };
        let value = serde_json::to_vec(&reading).context("failed to serialize reading")?;
        // Zero-padded millis keep sled's byte order chronological
        let key = format!(
            "{READING_PREFIX}{:013}:{:016x}",
            at.timestamp_millis(),
            self.db.generate_id().context("failed to allocate reading id")?,
        );
        self.db
            .insert(key.as_bytes(), value)
            .context("failed to write reading")?;
        Ok(true)
    }

    fn readings(&self) -> impl Iterator<Item = Result<Reading>> + '_ {
        self.db.scan_prefix(READING_PREFIX).map(|entry| {
            let (_, value) = entry.context("failed to scan readings")?;
            serde_json::from_slice(&value).context("failed to parse reading")
        })
    }

    /// Per-code reading totals, most-read first. Codes with no reads are
    /// omitted.
    pub fn reading_stats(&self) -> Result<Vec<ReadingStat>> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for reading in self.readings() {
            let reading = reading?;
            *counts.entry(reading.code).or_default() += 1;
        }

        let mut stats = Vec::new();
        for product in self.products()? {
            if let Some(&total) = counts.get(&product.code) {
                stats.push(ReadingStat {
                    code: product.code,
                    description: product.description,
                    total,
                });
            }
        }
        stats.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.code.cmp(&b.code)));
        Ok(stats)
    }

    /// Readings on one calendar day, chronological.
    pub fn readings_on_day(&self, day: chrono::NaiveDate) -> Result<Vec<Reading>> {
        let mut out = Vec::new();
        for reading in self.readings() {
            let reading = reading?;
            if reading.at.date_naive() == day {
                out.push(reading);
            }
        }
        Ok(out)
    }

    /// Readings in one calendar month, chronological.
    pub fn readings_in_month(&self, year: i32, month: u32) -> Result<Vec<Reading>> {
        let mut out = Vec::new();
        for reading in self.readings() {
            let reading = reading?;
            if reading.at.year() == year && reading.at.month() == month {
                out.push(reading);
            }
        }
        Ok(out)
    }
}

impl ProductStore for Catalog {
    fn exists(&self, code: &str) -> Result<bool> {
        Ok(self
            .db
            .contains_key(Self::product_key(code).as_bytes())
            .context("failed to read product")?)
    }

    fn record_reading(&self, code: &str) -> Result<bool> {
        self.record_reading_at(code, Local::now())
    }
}
