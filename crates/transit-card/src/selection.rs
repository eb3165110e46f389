//! Card selection: scenario, live capture and deferred resolution
//!
//! Live selection is capture followed by resolution, so a scenario resolved
//! remotely from a captured document gives exactly the card a local reader
//! would have found.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use transit_common::constants::aids;
use transit_common::tlv::{find_path, find_tag};
use transit_common::{CardFamily, ProductType};

use crate::apdu::{secure, ApduResponse};
use crate::error::{CardError, SelectionError, TransportError};
use crate::reader::CardReader;

/// PC/SC part 3 registered application provider in storage-card ATRs
const PCSC_RID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x06];

/// Optional byte strings as hex in selection documents
mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// One entry of a selection scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Candidate {
    /// Microprocessor application selected by AID.
    Application {
        #[serde(with = "hex")]
        aid: Vec<u8>,
        label: String,
    },
    /// Storage card recognized from its ATR.
    StorageCard { product: ProductType, label: String },
}

impl Candidate {
    pub fn label(&self) -> &str {
        match self {
            Candidate::Application { label, .. } | Candidate::StorageCard { label, .. } => label,
        }
    }
}

/// Ordered candidate list; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionScenario {
    pub candidates: Vec<Candidate>,
}

impl Default for SelectionScenario {
    fn default() -> Self {
        let application = |aid: &[u8], label: &str| Candidate::Application {
            aid: aid.to_vec(),
            label: label.to_string(),
        };
        let storage = |product: ProductType| Candidate::StorageCard {
            product,
            label: product.label().to_string(),
        };
        Self {
            candidates: vec![
                application(aids::KEYPLE_GENERIC, "Keyple generic"),
                application(aids::CALYPSO_LIGHT, "Calypso Light"),
                application(aids::CD_LIGHT_GTML, "CD Light GTML"),
                application(aids::NORMALIZED_IDF, "Navigo IDF"),
                storage(ProductType::MifareClassic1k),
                storage(ProductType::MifareUltralight),
                storage(ProductType::St25Srt512),
            ],
        }
    }
}

/// The card identified by selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCard {
    pub product: ProductType,
    /// DF name returned by the selected application
    #[serde(default, with = "hex_opt")]
    pub df_name: Option<Vec<u8>>,
    #[serde(default, with = "hex_opt")]
    pub serial_number: Option<Vec<u8>>,
    #[serde(default, with = "hex_opt")]
    pub startup_info: Option<Vec<u8>>,
}

impl ActiveCard {
    pub fn family(&self) -> CardFamily {
        self.product.family()
    }

    /// Active card for a storage product, which carries no FCI.
    pub fn storage(product: ProductType) -> Self {
        Self {
            product,
            df_name: None,
            serial_number: None,
            startup_info: None,
        }
    }
}

/// Raw response recorded for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    /// Index into the scenario's candidate list
    pub candidate: usize,
    /// Full SELECT response (data and status word); absent for storage
    /// candidates, which are matched on the ATR alone
    #[serde(default, with = "hex_opt")]
    pub response: Option<Vec<u8>>,
}

/// Everything a card answered while a scenario was played against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedSelection {
    #[serde(with = "hex")]
    pub atr: Vec<u8>,
    pub responses: Vec<CapturedResponse>,
}

impl CapturedSelection {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SelectionError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, SelectionError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Prefix match of an AID against a DF name. Bytes of the DF name past the
/// AID must be zero.
pub fn aid_matches(aid: &[u8], df_name: &[u8]) -> bool {
    df_name.len() >= aid.len()
        && df_name.starts_with(aid)
        && df_name[aid.len()..].iter().all(|&b| b == 0)
}

/// Card name from a PC/SC part 3 storage-card ATR.
pub fn atr_card_name(atr: &[u8]) -> Option<u16> {
    let at = atr.windows(PCSC_RID.len()).position(|w| w == PCSC_RID)?;
    // RID, standard byte, then two card-name bytes
    let name = atr.get(at + PCSC_RID.len() + 1..at + PCSC_RID.len() + 3)?;
    Some(u16::from_be_bytes([name[0], name[1]]))
}

/// Fields of interest in a secure application's FCI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Fci<'a> {
    df_name: Option<&'a [u8]>,
    serial_number: Option<&'a [u8]>,
    startup_info: Option<&'a [u8]>,
}

fn parse_fci(data: &[u8]) -> Fci<'_> {
    let Some(fci) = find_tag(data, &[0x6F]) else {
        return Fci::default();
    };
    let discretionary = find_path(fci, &[&[0xA5], &[0xBF, 0x0C]]);
    Fci {
        df_name: find_tag(fci, &[0x84]),
        serial_number: discretionary.and_then(|d| find_tag(d, &[0xC7])),
        startup_info: discretionary.and_then(|d| find_tag(d, &[0x53])),
    }
}

/// Decide whether `candidate` matched, given the ATR and the raw SELECT
/// response it produced.
fn match_candidate(candidate: &Candidate, atr: &[u8], response: Option<&[u8]>) -> Option<ActiveCard> {
    match candidate {
        Candidate::StorageCard { product, .. } => {
            let name = atr_card_name(atr)?;
            (ProductType::from_card_name(name) == Some(*product)).then(|| ActiveCard::storage(*product))
        }
        Candidate::Application { aid, .. } => {
            let response = ApduResponse::from_raw(response?).ok()?;
            if !response.is_success() {
                return None;
            }
            let fci = parse_fci(&response.data);
            let df_name = fci.df_name?;
            if !aid_matches(aid, df_name) {
                return None;
            }
            let application_type = *fci.startup_info?.get(2)?;
            let product = ProductType::from_application_type(application_type)?;
            Some(ActiveCard {
                product,
                df_name: Some(df_name.to_vec()),
                serial_number: fci.serial_number.map(<[u8]>::to_vec),
                startup_info: fci.startup_info.map(<[u8]>::to_vec),
            })
        }
    }
}

/// Plays a selection scenario against a card or a captured document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardSelector {
    scenario: SelectionScenario,
}

impl CardSelector {
    pub fn new(scenario: SelectionScenario) -> Self {
        Self { scenario }
    }

    /// Selector for a scenario exported elsewhere.
    pub fn from_exported(raw: &[u8]) -> Result<Self, SelectionError> {
        Ok(Self::new(serde_json::from_slice(raw)?))
    }

    pub fn scenario(&self) -> &SelectionScenario {
        &self.scenario
    }

    /// Serialized scenario. Does not touch any reader.
    pub fn export_scenario(&self) -> Result<Vec<u8>, SelectionError> {
        Ok(serde_json::to_vec_pretty(&self.scenario)?)
    }

    /// Record the card's answers to the scenario, stopping at the first
    /// candidate that matches.
    pub fn capture(&self, reader: &mut dyn CardReader) -> Result<CapturedSelection, TransportError> {
        let atr = reader.atr()?;
        debug!(reader = reader.name(), atr = %hex::encode_upper(&atr), "Capturing selection");

        let mut responses = Vec::new();
        for (index, candidate) in self.scenario.candidates.iter().enumerate() {
            let response = match candidate {
                Candidate::Application { aid, .. } => Some(reader.transmit(&secure::select(aid).build())?),
                Candidate::StorageCard { .. } => None,
            };
            let matched = match_candidate(candidate, &atr, response.as_deref()).is_some();
            responses.push(CapturedResponse {
                candidate: index,
                response,
            });
            if matched {
                break;
            }
        }

        Ok(CapturedSelection { atr, responses })
    }

    /// Resolve a captured selection with the same matching rules as
    /// [`select_live`](CardSelector::select_live).
    pub fn resolve(&self, captured: &CapturedSelection) -> Result<ActiveCard, SelectionError> {
        let len = self.scenario.candidates.len();
        for entry in &captured.responses {
            let candidate = self
                .scenario
                .candidates
                .get(entry.candidate)
                .ok_or(SelectionError::UnknownCandidate {
                    index: entry.candidate,
                    len,
                })?;
            if let Some(active) = match_candidate(candidate, &captured.atr, entry.response.as_deref()) {
                info!(candidate = candidate.label(), product = ?active.product, "Card selected");
                return Ok(active);
            }
        }
        Err(SelectionError::NoMatch)
    }

    /// Resolve a serialized [`CapturedSelection`].
    pub fn resolve_from_captured(&self, raw: &[u8]) -> Result<ActiveCard, SelectionError> {
        self.resolve(&CapturedSelection::from_bytes(raw)?)
    }

    /// Select the card in the reader's field.
    pub fn select_live(&self, reader: &mut dyn CardReader) -> Result<ActiveCard, CardError> {
        let captured = self.capture(reader)?;
        Ok(self.resolve(&captured)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fci(df_name: &[u8], application_type: u8) -> Vec<u8> {
        let startup = [0x0A, 0x3C, application_type, 0x01, 0x01, 0x01, 0x01];
        let serial = [0x00, 0x00, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78];

        let mut bf0c = vec![0xC7, serial.len() as u8];
        bf0c.extend_from_slice(&serial);
        bf0c.extend_from_slice(&[0x53, startup.len() as u8]);
        bf0c.extend_from_slice(&startup);

        let mut a5 = vec![0xBF, 0x0C, bf0c.len() as u8];
        a5.extend_from_slice(&bf0c);

        let mut body = vec![0x84, df_name.len() as u8];
        body.extend_from_slice(df_name);
        body.push(0xA5);
        body.push(a5.len() as u8);
        body.extend_from_slice(&a5);

        let mut out = vec![0x6F, body.len() as u8];
        out.extend_from_slice(&body);
        out.extend_from_slice(&[0x90, 0x00]);
        out
    }

    fn storage_atr(card_name: u16) -> Vec<u8> {
        let [hi, lo] = card_name.to_be_bytes();
        vec![
            0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, hi, lo,
            0x00, 0x00, 0x00, 0x00, 0x68,
        ]
    }

    #[test]
    fn test_aid_matches() {
        assert!(aid_matches(&[0xA0, 0x00], &[0xA0, 0x00]));
        assert!(aid_matches(&[0xA0, 0x00], &[0xA0, 0x00, 0x00]));
        assert!(!aid_matches(&[0xA0, 0x00], &[0xA0, 0x00, 0x01]));
        assert!(!aid_matches(&[0xA0, 0x00, 0x01], &[0xA0, 0x00]));
    }

    #[test]
    fn test_atr_card_name() {
        assert_eq!(atr_card_name(&storage_atr(0x0001)), Some(0x0001));
        assert_eq!(atr_card_name(&storage_atr(0x0007)), Some(0x0007));
        assert_eq!(atr_card_name(&[0x3B, 0x88, 0x80, 0x01]), None);
    }

    #[test]
    fn test_resolve_application() {
        let selector = CardSelector::default();
        let captured = CapturedSelection {
            atr: vec![0x3B, 0x88, 0x80, 0x01],
            responses: vec![CapturedResponse {
                candidate: 0,
                response: Some(fci(aids::KEYPLE_GENERIC, 0x20)),
            }],
        };
        let active = selector.resolve(&captured).unwrap();
        assert_eq!(active.product, ProductType::CalypsoLight);
        assert_eq!(active.family(), CardFamily::Secure);
        assert_eq!(active.df_name.as_deref(), Some(aids::KEYPLE_GENERIC));
        assert_eq!(
            active.serial_number.as_deref(),
            Some(&[0x00, 0x00, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78][..])
        );
    }

    #[test]
    fn test_resolve_skips_failed_select() {
        let selector = CardSelector::default();
        let captured = CapturedSelection {
            atr: vec![0x3B, 0x88, 0x80, 0x01],
            responses: vec![
                CapturedResponse {
                    candidate: 0,
                    response: Some(vec![0x6A, 0x82]),
                },
                CapturedResponse {
                    candidate: 3,
                    response: Some(fci(aids::NORMALIZED_IDF, 0x30)),
                },
            ],
        };
        assert_eq!(
            selector.resolve(&captured).unwrap().product,
            ProductType::CalypsoPrime
        );
    }

    #[test]
    fn test_resolve_storage_card() {
        let selector = CardSelector::default();
        let captured = CapturedSelection {
            atr: storage_atr(0x0003),
            responses: vec![
                CapturedResponse {
                    candidate: 4,
                    response: None,
                },
                CapturedResponse {
                    candidate: 5,
                    response: None,
                },
            ],
        };
        assert_eq!(
            selector.resolve(&captured).unwrap(),
            ActiveCard::storage(ProductType::MifareUltralight)
        );
    }

    #[test]
    fn test_no_match() {
        let selector = CardSelector::default();
        let captured = CapturedSelection {
            atr: vec![0x3B, 0x00],
            responses: vec![CapturedResponse {
                candidate: 1,
                response: Some(vec![0x6A, 0x82]),
            }],
        };
        assert!(matches!(selector.resolve(&captured), Err(SelectionError::NoMatch)));
    }

    #[test]
    fn test_unknown_candidate() {
        let selector = CardSelector::default();
        let captured = CapturedSelection {
            atr: vec![],
            responses: vec![CapturedResponse {
                candidate: 42,
                response: None,
            }],
        };
        assert!(matches!(
            selector.resolve(&captured),
            Err(SelectionError::UnknownCandidate { index: 42, len: 7 })
        ));
    }

    #[test]
    fn test_exported_scenario_reloads() {
        let selector = CardSelector::default();
        let exported = selector.export_scenario().unwrap();
        let text = String::from_utf8(exported.clone()).unwrap();
        assert!(text.contains("a000000291ff9101"));
        assert_eq!(CardSelector::from_exported(&exported).unwrap(), selector);
    }

    #[test]
    fn test_captured_document_roundtrip() {
        let captured = CapturedSelection {
            atr: storage_atr(0x0001),
            responses: vec![CapturedResponse {
                candidate: 0,
                response: Some(vec![0x6A, 0x82]),
            }],
        };
        let raw = captured.to_bytes().unwrap();
        assert_eq!(CapturedSelection::from_bytes(&raw).unwrap(), captured);
    }
}
