#![allow(clippy::missing_errors_doc)]

//! SQLite-backed mutation pipeline for companies and invoices.
//!
//! Uniqueness and referential integrity are enforced by the store's own
//! constraints rather than application-level pre-checks: creates issue the
//! `INSERT` directly and treat a constraint-violation failure as the
//! authoritative conflict signal, so concurrent writers racing on the same
//! code or name resolve atomically at write time. Update and delete use
//! affected-row counts to distinguish a missing row from a conflicting one.

use std::path::{Path, PathBuf};

use ledger_core::{
    format_rfc3339, now_utc, require_found, Company, CompanyDetail, CompanySummary, Invoice,
    InvoiceDetail, InvoiceSummary, LedgerError,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

const SCHEMA_LEDGER_V1: &str = r"
CREATE TABLE IF NOT EXISTS companies (
  code TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invoices (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  comp_code TEXT NOT NULL REFERENCES companies(code),
  amt REAL NOT NULL CHECK (amt > 0),
  paid INTEGER NOT NULL DEFAULT 0 CHECK (paid IN (0, 1)),
  add_date TEXT NOT NULL,
  paid_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_invoices_comp_code ON invoices(comp_code, id);
";

pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(|err| {
            LedgerError::internal(format!(
                "failed to open sqlite database at {}: {err}",
                path.display()
            ))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|err| LedgerError::internal(format!("failed to configure sqlite: {err}")))?;

        Ok(Self { conn })
    }

    /// Idempotent schema bootstrap; safe to run at every startup.
    pub fn bootstrap(&self) -> Result<(), LedgerError> {
        self.conn
            .execute_batch(SCHEMA_LEDGER_V1)
            .map_err(|err| LedgerError::internal(format!("failed to apply schema: {err}")))
    }

    pub fn list_companies(&self) -> Result<Vec<CompanySummary>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT code, name FROM companies")
            .map_err(internal)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CompanySummary { code: row.get(0)?, name: row.get(1)? })
            })
            .map_err(internal)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(internal)
    }

    /// Company plus the ids of its invoices. The two statements are not
    /// wrapped in a transaction; invoices are append/delete-only, so a
    /// momentarily stale id list is accepted.
    pub fn get_company(&self, code: &str) -> Result<CompanyDetail, LedgerError> {
        let company = self.company_row(code)?;
        let company = require_found(company, code)?;

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM invoices WHERE comp_code = ?1 ORDER BY id")
            .map_err(internal)?;
        let ids = stmt
            .query_map(params![code], |row| row.get::<_, i64>(0))
            .map_err(internal)?;
        let invoices = ids.collect::<Result<Vec<_>, _>>().map_err(internal)?;

        Ok(CompanyDetail { company, invoices })
    }

    pub fn create_company(
        &self,
        code: &str,
        name: &str,
        description: &str,
    ) -> Result<Company, LedgerError> {
        let inserted = self.conn.execute(
            "INSERT INTO companies (code, name, description) VALUES (?1, ?2, ?3)",
            params![code, name, description],
        );
        match inserted {
            Ok(_) => Ok(Company {
                code: code.to_string(),
                name: name.to_string(),
                description: description.to_string(),
            }),
            Err(err) if is_constraint_violation(&err) => {
                Err(LedgerError::conflict("Name or code already exists"))
            }
            Err(err) => Err(internal(err)),
        }
    }

    /// Updates name and description; the code is immutable. A zero-row update
    /// means the company does not exist, while a uniqueness failure means the
    /// new name collides with a different company.
    pub fn update_company(
        &self,
        code: &str,
        name: &str,
        description: &str,
    ) -> Result<Company, LedgerError> {
        let affected = self.conn.execute(
            "UPDATE companies SET name = ?1, description = ?2 WHERE code = ?3",
            params![name, description, code],
        );
        match affected {
            Ok(0) => Err(LedgerError::not_found(code)),
            Ok(_) => Ok(Company {
                code: code.to_string(),
                name: name.to_string(),
                description: description.to_string(),
            }),
            Err(err) if is_constraint_violation(&err) => {
                Err(LedgerError::conflict("Name already taken"))
            }
            Err(err) => Err(internal(err)),
        }
    }

    /// Deleting a company that still has invoices is rejected; the
    /// foreign-key constraint is the enforcement point.
    pub fn delete_company(&self, code: &str) -> Result<(), LedgerError> {
        let affected = self
            .conn
            .execute("DELETE FROM companies WHERE code = ?1", params![code]);
        match affected {
            Ok(0) => Err(LedgerError::not_found(code)),
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => Err(LedgerError::conflict(format!(
                "Company still has invoices: {code}"
            ))),
            Err(err) => Err(internal(err)),
        }
    }

    pub fn list_invoices(&self) -> Result<Vec<InvoiceSummary>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, comp_code FROM invoices")
            .map_err(internal)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(InvoiceSummary { id: row.get(0)?, comp_code: row.get(1)? })
            })
            .map_err(internal)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(internal)
    }

    /// Invoice joined with its owning company. The foreign key guarantees the
    /// company row exists; its absence here is a store integrity fault, not a
    /// caller-visible 404.
    pub fn get_invoice(&self, id: i64) -> Result<InvoiceDetail, LedgerError> {
        let invoice = self.invoice_row(id)?;
        let invoice = require_found(invoice, &id.to_string())?;

        let company = self.company_row(&invoice.comp_code)?.ok_or_else(|| {
            LedgerError::internal(format!(
                "invoice {id} references missing company {}",
                invoice.comp_code
            ))
        })?;

        Ok(InvoiceDetail {
            id: invoice.id,
            amt: invoice.amt,
            paid: invoice.paid,
            add_date: invoice.add_date,
            paid_date: invoice.paid_date,
            company,
        })
    }

    /// The caller validates `amt` first; the foreign-key check runs
    /// atomically with the insert, so an unknown `comp_code` surfaces as a
    /// constraint failure rather than a pre-read.
    pub fn create_invoice(&self, comp_code: &str, amt: f64) -> Result<Invoice, LedgerError> {
        let add_date = format_rfc3339(now_utc())?;
        let inserted = self.conn.execute(
            "INSERT INTO invoices (comp_code, amt, add_date) VALUES (?1, ?2, ?3)",
            params![comp_code, amt, add_date],
        );
        match inserted {
            Ok(_) => Ok(Invoice {
                id: self.conn.last_insert_rowid(),
                comp_code: comp_code.to_string(),
                amt,
                paid: false,
                add_date,
                paid_date: None,
            }),
            Err(err) if is_constraint_violation(&err) => Err(LedgerError::conflict(format!(
                "Company code does not exist: {comp_code}"
            ))),
            Err(err) => Err(internal(err)),
        }
    }

    pub fn update_invoice(&self, id: i64, amt: f64) -> Result<Invoice, LedgerError> {
        let affected = self
            .conn
            .execute("UPDATE invoices SET amt = ?1 WHERE id = ?2", params![amt, id])
            .map_err(internal)?;
        if affected == 0 {
            return Err(LedgerError::not_found(id.to_string()));
        }
        let updated = self.invoice_row(id)?;
        require_found(updated, &id.to_string())
    }

    pub fn delete_invoice(&self, id: i64) -> Result<(), LedgerError> {
        let affected = self
            .conn
            .execute("DELETE FROM invoices WHERE id = ?1", params![id])
            .map_err(internal)?;
        if affected == 0 {
            return Err(LedgerError::not_found(id.to_string()));
        }
        Ok(())
    }

    fn company_row(&self, code: &str) -> Result<Option<Company>, LedgerError> {
        self.conn
            .query_row(
                "SELECT code, name, description FROM companies WHERE code = ?1",
                params![code],
                |row| {
                    Ok(Company {
                        code: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(internal)
    }

    fn invoice_row(&self, id: i64) -> Result<Option<Invoice>, LedgerError> {
        self.conn
            .query_row(
                "SELECT id, comp_code, amt, paid, add_date, paid_date
                 FROM invoices WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Invoice {
                        id: row.get(0)?,
                        comp_code: row.get(1)?,
                        amt: row.get(2)?,
                        paid: row.get(3)?,
                        add_date: row.get(4)?,
                        paid_date: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(internal)
    }
}

/// Cloneable handle the service layer hands to blocking workers. Each
/// operation opens its own connection; WAL plus `busy_timeout` make the
/// short single-statement transactions safe under concurrent callers.
#[derive(Debug, Clone)]
pub struct LedgerApi {
    db_path: PathBuf,
}

impl LedgerApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn bootstrap(&self) -> Result<(), LedgerError> {
        self.store()?.bootstrap()
    }

    pub fn list_companies(&self) -> Result<Vec<CompanySummary>, LedgerError> {
        self.store()?.list_companies()
    }

    pub fn get_company(&self, code: &str) -> Result<CompanyDetail, LedgerError> {
        self.store()?.get_company(code)
    }

    pub fn create_company(
        &self,
        code: &str,
        name: &str,
        description: &str,
    ) -> Result<Company, LedgerError> {
        self.store()?.create_company(code, name, description)
    }

    pub fn update_company(
        &self,
        code: &str,
        name: &str,
        description: &str,
    ) -> Result<Company, LedgerError> {
        self.store()?.update_company(code, name, description)
    }

    pub fn delete_company(&self, code: &str) -> Result<(), LedgerError> {
        self.store()?.delete_company(code)
    }

    pub fn list_invoices(&self) -> Result<Vec<InvoiceSummary>, LedgerError> {
        self.store()?.list_invoices()
    }

    pub fn get_invoice(&self, id: i64) -> Result<InvoiceDetail, LedgerError> {
        self.store()?.get_invoice(id)
    }

    pub fn create_invoice(&self, comp_code: &str, amt: f64) -> Result<Invoice, LedgerError> {
        self.store()?.create_invoice(comp_code, amt)
    }

    pub fn update_invoice(&self, id: i64, amt: f64) -> Result<Invoice, LedgerError> {
        self.store()?.update_invoice(id, amt)
    }

    pub fn delete_invoice(&self, id: i64) -> Result<(), LedgerError> {
        self.store()?.delete_invoice(id)
    }

    fn store(&self) -> Result<SqliteLedgerStore, LedgerError> {
        SqliteLedgerStore::open(&self.db_path)
    }
}

fn internal(err: rusqlite::Error) -> LedgerError {
    LedgerError::internal(err.to_string())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
    )
}
