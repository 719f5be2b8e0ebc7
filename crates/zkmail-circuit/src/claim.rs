//! payment confirmation parsing
//!
//! reads the payment a PayPal notification describes out of the DKIM
//! verified parts of the message only: the signed header fields and the
//! canonicalized body. french and english templates are recognised, both
//! for sent and for received payments.

use std::sync::OnceLock;

use mailparse::ParsedMail;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use zkmail_dkim::DkimRecord;

use crate::inputs::CircuitInputs;
use crate::{Error, Result};

/// amounts are fixed point with this many decimals
pub const AMOUNT_DECIMALS: u32 = 6;
const MICROS: u64 = 1_000_000;
const CLAIM_DOMAIN: &[u8] = b"zkmail-claim-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentClaim {
    pub direction: Direction,
    /// recipient of a sent payment, sender of a received one
    pub counterparty: String,
    pub amount_micros: u64,
    /// ISO 4217 code
    pub currency: String,
    pub transaction_id: Option<String>,
}

// amount with an optional symbol on either side, then the currency code
const AMOUNT: &str = r"[$€£]?\s*(?P<amount>\d(?:[\d.,]*\d)?)\s*[$€£]?\s*(?P<currency>[A-Z]{3})\b";

struct Patterns {
    sent: Vec<Regex>,
    received: Vec<Regex>,
    transaction_id: Regex,
    tag: Regex,
    blank: Regex,
}

impl Patterns {
    fn compile() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            sent: vec![
                Regex::new(&format!(
                    r"(?i:vous avez envoy[ée](?:\s+un\s+paiement)?(?:\s+de)?)\s+{}\s+(?i:à)\s+(?P<party>[^.\r\n]+)",
                    AMOUNT
                ))?,
                Regex::new(&format!(
                    r"(?i:you sent(?:\s+a\s+payment\s+of)?)\s+{}\s+(?i:to)\s+(?P<party>[^.\r\n]+)",
                    AMOUNT
                ))?,
            ],
            received: vec![
                Regex::new(&format!(
                    r"(?m)^\s*(?P<party>[^\r\n]+?)\s+(?i:vous a envoyé)(?:\s+(?i:un paiement de))?\s+{}",
                    AMOUNT
                ))?,
                Regex::new(&format!(
                    r"(?m)^\s*(?P<party>[^\r\n]+?)\s+(?i:has sent you)(?:\s+(?i:a payment of))?\s+{}",
                    AMOUNT
                ))?,
            ],
            transaction_id: Regex::new(
                r"(?:(?i:num[ée]ro de transaction|transaction id)\s*:?\s*|transaction/details/)(?P<id>[A-Z0-9]{8,24})\b",
            )?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            blank: Regex::new(r"[ \t]+")?,
        })
    }
}

fn patterns() -> Result<&'static Patterns> {
    static PATTERNS: OnceLock<std::result::Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(Patterns::compile)
        .as_ref()
        .map_err(|e| Error::Claim(format!("bad claim pattern: {}", e)))
}

impl PaymentClaim {
    /// parse the payment out of a verified record
    pub fn extract(record: &DkimRecord) -> Result<Self> {
        let text = signed_text(&record.header, record.dkim_field.index, &record.body)?;
        Self::from_text(&text)
    }

    /// parse from circuit inputs; reads the same bytes as [`PaymentClaim::extract`]
    pub fn from_inputs(inputs: &CircuitInputs) -> Result<Self> {
        let text = signed_text(
            inputs.header.as_slice(),
            inputs.dkim_header_sequence.index,
            inputs.body.as_slice(),
        )?;
        Self::from_text(&text)
    }

    /// sha256 over a length-prefixed encoding of every field
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(CLAIM_DOMAIN);
        hasher.update([match self.direction {
            Direction::Sent => 0u8,
            Direction::Received => 1u8,
        }]);
        hasher.update(self.amount_micros.to_le_bytes());
        for field in [Some(&self.counterparty), Some(&self.currency), self.transaction_id.as_ref()] {
            match field {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_le_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        hasher.finalize().into()
    }

    /// parse from already decoded message text
    pub fn from_text(text: &str) -> Result<Self> {
        let p = patterns()?;

        let found = p
            .sent
            .iter()
            .find_map(|re| re.captures(text).map(|c| (Direction::Sent, c)))
            .or_else(|| {
                p.received
                    .iter()
                    .find_map(|re| re.captures(text).map(|c| (Direction::Received, c)))
            });
        let (direction, caps) =
            found.ok_or_else(|| Error::Claim("no payment confirmation in the signed body".into()))?;

        let counterparty = caps
            .name("party")
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Claim("payment has no counterparty".into()))?;
        let raw_amount = caps.name("amount").map(|m| m.as_str()).unwrap_or_default();
        let amount_micros = parse_amount_micros(raw_amount)?;
        let currency = caps
            .name("currency")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let transaction_id = p
            .transaction_id
            .captures(text)
            .and_then(|c| c.name("id"))
            .map(|m| m.as_str().to_string());

        debug!(
            "payment claim: {:?} {} {} {} tx {:?}",
            direction, amount_micros, currency, counterparty, transaction_id
        );
        Ok(Self {
            direction,
            counterparty,
            amount_micros,
            currency,
            transaction_id,
        })
    }
}

/// "20,00", "1.234,50", "1,234.56" or "5" to 6-decimal fixed point
///
/// the last separator is decimal when one or two digits follow it,
/// otherwise every separator groups thousands.
pub fn parse_amount_micros(raw: &str) -> Result<u64> {
    let bad = || Error::Claim(format!("unparsable amount {:?}", raw));
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(bad());
    }

    let (int_part, frac_part) = match raw.rfind(['.', ',']) {
        Some(pos) if (1..=2).contains(&(raw.len() - pos - 1)) => (&raw[..pos], &raw[pos + 1..]),
        _ => (raw, ""),
    };
    let digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(bad());
    }

    let whole: u64 = digits.parse().map_err(|_| bad())?;
    let mut frac: u64 = 0;
    for (i, c) in frac_part.chars().enumerate() {
        let digit = c.to_digit(10).ok_or_else(bad)? as u64;
        frac += digit * 10u64.pow(AMOUNT_DECIMALS - 1 - i as u32);
    }
    whole
        .checked_mul(MICROS)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(bad)
}

/// decoded text of the signed headers before the DKIM-Signature field and the body
fn signed_text(header: &[u8], dkim_index: usize, body: &[u8]) -> Result<String> {
    let mut message = header[..dkim_index.min(header.len())].to_vec();
    if !message.ends_with(b"\r\n") {
        message.extend_from_slice(b"\r\n");
    }
    message.extend_from_slice(b"\r\n");
    message.extend_from_slice(body);

    let mail = mailparse::parse_mail(&message)
        .map_err(|e| Error::Claim(format!("unparsable message: {}", e)))?;
    let text = readable_part(&mail)?.ok_or_else(|| Error::Claim("no text part".into()))?;
    let p = patterns()?;
    Ok(p.blank.replace_all(&text.replace('\u{a0}', " "), " ").into_owned())
}

/// first text/plain part, else the first text/html part with tags removed
fn readable_part(mail: &ParsedMail) -> Result<Option<String>> {
    let mut html = None;
    let mut stack = vec![mail];
    while let Some(part) = stack.pop() {
        if !part.subparts.is_empty() {
            stack.extend(part.subparts.iter().rev());
            continue;
        }
        let body = || {
            part.get_body()
                .map_err(|e| Error::Claim(format!("undecodable part: {}", e)))
        };
        match part.ctype.mimetype.as_str() {
            "text/plain" => return body().map(Some),
            "text/html" if html.is_none() => html = Some(strip_html(&body()?)?),
            _ => {}
        }
    }
    Ok(html)
}

fn strip_html(html: &str) -> Result<String> {
    let p = patterns()?;
    let text = p.tag.replace_all(html, " ");
    Ok(text
        .replace("&nbsp;", " ")
        .replace("&eacute;", "é")
        .replace("&agrave;", "à")
        .replace("&euro;", "€")
        .replace("&amp;", "&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amounts() {
        assert_eq!(parse_amount_micros("20,00").unwrap(), 20_000_000);
        assert_eq!(parse_amount_micros("1,234.56").unwrap(), 1_234_560_000);
        assert_eq!(parse_amount_micros("1.234,5").unwrap(), 1_234_500_000);
        assert_eq!(parse_amount_micros("1.234").unwrap(), 1_234_000_000);
        assert_eq!(parse_amount_micros("7").unwrap(), 7_000_000);
        assert!(parse_amount_micros("").is_err());
        assert!(parse_amount_micros(",50").is_err());
        assert!(parse_amount_micros("99999999999999999999").is_err());
    }

    #[test]
    fn test_sent_french() {
        let claim = PaymentClaim::from_text(
            "Bonjour,\r\nVous avez envoyé un paiement de 1.250,00 € EUR à Dupont SARL.\r\nNuméro de transaction : 1AB23456CD789012E\r\n",
        )
        .unwrap();
        assert_eq!(claim.direction, Direction::Sent);
        assert_eq!(claim.amount_micros, 1_250_000_000);
        assert_eq!(claim.currency, "EUR");
        assert_eq!(claim.counterparty, "Dupont SARL");
        assert_eq!(claim.transaction_id.as_deref(), Some("1AB23456CD789012E"));
    }

    #[test]
    fn test_received_english() {
        let claim = PaymentClaim::from_text("Hi,\nAcme Corp has sent you $15.00 USD.\n").unwrap();
        assert_eq!(claim.direction, Direction::Received);
        assert_eq!(claim.counterparty, "Acme Corp");
        assert_eq!(claim.amount_micros, 15_000_000);
        assert_eq!(claim.transaction_id, None);
    }

    #[test]
    fn test_received_french() {
        let claim = PaymentClaim::from_text("Jean Martin vous a envoyé 100,00 € EUR.").unwrap();
        assert_eq!(claim.direction, Direction::Received);
        assert_eq!(claim.counterparty, "Jean Martin");
        assert_eq!(claim.amount_micros, 100_000_000);
    }

    #[test]
    fn test_unrelated_text() {
        assert!(matches!(
            PaymentClaim::from_text("Your order has shipped."),
            Err(Error::Claim(_))
        ));
    }

    #[test]
    fn test_digest_covers_every_field() {
        let claim = PaymentClaim::from_text("Hi,\nAcme Corp has sent you $15.00 USD.\n").unwrap();
        let base = claim.digest();
        assert_eq!(base, claim.clone().digest());

        let mut amount = claim.clone();
        amount.amount_micros = 1_000_000_000_000_000;
        let mut currency = claim.clone();
        currency.currency = "EUR".into();
        let mut party = claim.clone();
        party.counterparty = "Mallory".into();
        let mut direction = claim.clone();
        direction.direction = Direction::Sent;
        let mut tx = claim.clone();
        tx.transaction_id = Some(String::new());
        for other in [amount, currency, party, direction, tx] {
            assert_ne!(other.digest(), base, "{:?}", other);
        }
    }

    #[test]
    fn test_html_stripped() {
        let text = strip_html("<p>You sent a payment of <b>$5.00&nbsp;USD</b> to Dana.</p>").unwrap();
        let claim = PaymentClaim::from_text(&text.replace('\u{a0}', " ")).unwrap();
        assert_eq!(claim.amount_micros, 5_000_000);
        assert_eq!(claim.counterparty, "Dana");
    }
}
