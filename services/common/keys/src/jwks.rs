use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;

use crate::error::KeyManagerResult;
use crate::model::KeyPair;

/// A single entry in a JSON Web Key Set.
#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    pub kty: &'static str,
    #[serde(rename = "use")]
    pub use_: &'static str,
    pub kid: String,
    pub alg: &'static str,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

pub fn jwk_from_key_pair(key: &KeyPair) -> KeyManagerResult<Jwk> {
    let private = RsaPrivateKey::from_pkcs8_pem(&key.private_key_pem)
        .map_err(|err| crate::error::KeyManagerError::Load(format!("parse RSA key: {err}")))?;
    let public = private.to_public_key();
    let n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());
    Ok(Jwk {
        kty: "RSA",
        use_: "sig",
        kid: key.key_id.clone(),
        alg: key.algorithm.as_str(),
        n,
        e,
    })
}
