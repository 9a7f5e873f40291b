//! Parsed document records and their relay wire shape.
//!
//! [`MrzRecord`] is what the MRZ parser produces. [`RelayRecord`] stamps a
//! record with the device that scanned it and the terminal it is meant for,
//! and serializes to the flat camelCase object sent over the relay:
//!
//! ```json
//! {
//!   "deviceId": "3f1c...", "terminalId": "desk-1",
//!   "documentType": "P", "lastName": "ERIKSSON", "firstName": "ANNA MARIA",
//!   "documentNumber": "L898902C36", "nationality": "UTO", "sex": "F",
//!   "birthDate": "1974-08-12", "expirationDate": "2012-04-15",
//!   "issuingCountry": "UTO", "rawMrzData": "P<UTOERIKSSON..."
//! }
//! ```
//!
//! Unknown dates are omitted rather than zero-valued; string fields are
//! always present and empty when the template did not yield a value.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, TerminalId};

/// Structured identity fields extracted from one MRZ scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MrzRecord {
    pub document_type: String,
    pub last_name: String,
    pub first_name: String,
    pub document_number: String,
    pub nationality: String,
    pub sex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    pub issuing_country: String,
    pub raw_mrz_data: String,

    /// Names of fields whose declared check digit did not match.
    ///
    /// Local diagnostics only; never sent over the relay.
    #[serde(skip)]
    pub check_digit_failures: Vec<String>,
}

impl MrzRecord {
    /// True when every declared check digit matched.
    #[must_use]
    pub fn check_digits_valid(&self) -> bool {
        self.check_digit_failures.is_empty()
    }
}

/// A record addressed from one device to one terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    pub device_id: DeviceId,
    pub terminal_id: TerminalId,
    #[serde(flatten)]
    pub record: MrzRecord,
}

impl RelayRecord {
    pub fn new(device_id: DeviceId, terminal_id: TerminalId, record: MrzRecord) -> Self {
        Self {
            device_id,
            terminal_id,
            record,
        }
    }
}
