//! Password, SASL and GSS authentication responses.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::{Digest as _, Md5};
use rand::Rng as _;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage (cleartext or MD5 hashed).
pub fn write_password(buf: &mut Vec<u8>, password: &str) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish()
}

/// `"md5" + md5(md5(password + user) + salt)`, hex encoded.
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(user.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{inner:x}").as_bytes())
        .chain_update(salt)
        .finalize();
    format!("md5{outer:x}")
}

/// Write a SASLInitialResponse.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, data: &[u8]) -> Result<()> {
    let len = i32::try_from(data.len())
        .map_err(|_| Error::Auth("SASL initial response too large".into()))?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(len);
    msg.write_bytes(data);
    msg.finish()
}

/// Write a SASLResponse, or a GSS token during GSSAPI authentication.
pub fn write_sasl_response(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(data);
    msg.finish()
}

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| Error::Auth(format!("HMAC error: {e}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// SCRAM-SHA-256 exchange without channel binding.
pub struct ScramClient {
    nonce: String,
    password: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        let mut nonce = [0u8; 24];
        rand::rng().fill(&mut nonce);
        Self {
            nonce: STANDARD.encode(nonce),
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    // The server takes the user name from the startup message.
    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// `client-first-message`.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    /// Answer `server-first-message` with `client-final-message`.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                nonce = Some(v);
            } else if let Some(v) = part.strip_prefix("s=") {
                salt = Some(v);
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = v.parse::<u32>().ok();
            }
        }
        let missing = |what: &str| Error::Auth(format!("Missing {what} in server-first-message"));
        let nonce = nonce.ok_or_else(|| missing("nonce"))?;
        let salt = salt.ok_or_else(|| missing("salt"))?;
        let iterations = iterations.ok_or_else(|| missing("iterations"))?;

        if !nonce.starts_with(&self.nonce) {
            return Err(Error::Auth("Server nonce doesn't start with client nonce".into()));
        }
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| Error::Auth(format!("Invalid salt: {e}")))?;

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let without_proof = format!("c={},r={nonce}", STANDARD.encode(b"n,,"));
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare());
        let signature = hmac(&stored_key, auth_message.as_bytes())?;

        let proof: Vec<u8> = client_key.iter().zip(signature).map(|(k, s)| k ^ s).collect();

        self.salted_password = Some(salted);
        self.auth_message = Some(auth_message);
        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)))
    }

    /// Check the server signature in `server-final-message`.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let signature = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("Invalid server-final-message format".into()))?;
        let signature = STANDARD
            .decode(signature)
            .map_err(|e| Error::Auth(format!("Invalid server signature: {e}")))?;

        let (Some(salted), Some(auth_message)) = (&self.salted_password, &self.auth_message) else {
            return Err(Error::Auth("server-final-message before server-first-message".into()));
        };
        let server_key = hmac(salted, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;
        if signature != expected {
            return Err(Error::Auth("Server signature verification failed".into()));
        }
        Ok(())
    }
}
