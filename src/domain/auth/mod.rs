//! Authentication parameters for one MM transaction
//!
//! Created fresh per location update or detach and discarded when the
//! transaction ends. Challenge, response and ciphering key are explicit
//! optionals so nothing can read a value that was never furnished.

use crate::domain::shared::{ControlError, MobileIdentity, Result};
use serde::{Deserialize, Serialize};

/// Width of a hex-encoded RAND
pub const RAND_HEX_LEN: usize = 32;
/// Width of a hex-encoded Kc
pub const KC_HEX_LEN: usize = 16;
/// Width of a hex-encoded SRES
pub const SRES_HEX_LEN: usize = 8;

/// A3/A8 algorithm used to derive SRES and Kc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthAlgorithm {
    Milenage,
    #[default]
    Comp128v1,
}

impl AuthAlgorithm {
    /// Algorithm named by a digest challenge, `algorithm=AKAv1-MD5` being
    /// the only one that selects Milenage
    pub fn from_challenge(challenge: &str) -> Self {
        let named = challenge.split(',').find_map(|part| {
            let (key, value) = part.trim().split_once('=')?;
            key.trim()
                .rsplit(' ')
                .next()
                .filter(|k| k.eq_ignore_ascii_case("algorithm"))
                .map(|_| value.trim().trim_matches('"').to_string())
        });
        match named {
            Some(name) if name.to_ascii_uppercase().starts_with("AKA") => Self::Milenage,
            _ => Self::Comp128v1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationParameters {
    mobile_id: MobileIdentity,
    rand: Option<[u8; 16]>,
    sres: Option<u32>,
    kc: Option<u64>,
    cksn: u8,
    algorithm: AuthAlgorithm,
    a5: u8,
}

impl AuthenticationParameters {
    pub fn new(mobile_id: MobileIdentity) -> Self {
        Self {
            mobile_id,
            rand: None,
            sres: None,
            kc: None,
            cksn: 0,
            algorithm: AuthAlgorithm::default(),
            a5: 0,
        }
    }

    pub fn mobile_id(&self) -> &MobileIdentity {
        &self.mobile_id
    }

    /// Set the challenge from its 32 hex character form (either case)
    pub fn set_rand_hex(&mut self, value: &str) -> Result<()> {
        let bytes = decode_fixed::<16>(value, RAND_HEX_LEN, "RAND")?;
        self.rand = Some(bytes);
        Ok(())
    }

    pub fn rand(&self) -> Option<&[u8; 16]> {
        self.rand.as_ref()
    }

    /// Challenge as 32 lowercase hex characters
    pub fn rand_hex(&self) -> Option<String> {
        self.rand.map(hex::encode)
    }

    pub fn set_sres(&mut self, sres: u32) {
        self.sres = Some(sres);
    }

    pub fn sres(&self) -> Option<u32> {
        self.sres
    }

    /// Response as 8 zero-padded hex characters
    pub fn sres_hex(&self) -> Option<String> {
        self.sres.map(|s| format!("{:0width$x}", s, width = SRES_HEX_LEN))
    }

    /// Set the ciphering key from its 16 hex character form
    pub fn set_kc_hex(&mut self, value: &str) -> Result<()> {
        let bytes = decode_fixed::<8>(value, KC_HEX_LEN, "Kc")?;
        self.kc = Some(u64::from_be_bytes(bytes));
        Ok(())
    }

    pub fn kc(&self) -> Option<u64> {
        self.kc
    }

    /// Ciphering key as 16 zero-padded hex characters
    pub fn kc_hex(&self) -> Option<String> {
        self.kc.map(|k| format!("{:0width$x}", k, width = KC_HEX_LEN))
    }

    pub fn set_cksn(&mut self, cksn: u8) {
        self.cksn = cksn & 0x07;
    }

    pub fn cksn(&self) -> u8 {
        self.cksn
    }

    pub fn set_algorithm(&mut self, algorithm: AuthAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn algorithm(&self) -> AuthAlgorithm {
        self.algorithm
    }

    pub fn set_a5(&mut self, a5: u8) {
        self.a5 = a5;
    }

    pub fn a5(&self) -> u8 {
        self.a5
    }
}

fn decode_fixed<const N: usize>(value: &str, width: usize, what: &str) -> Result<[u8; N]> {
    if value.len() != width {
        return Err(ControlError::InvalidParameter(format!(
            "{} must be {} hex characters, got {}",
            what,
            width,
            value.len()
        )));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out)
        .map_err(|e| ControlError::InvalidParameter(format!("{}: {}", what, e)))?;
    Ok(out)
}
