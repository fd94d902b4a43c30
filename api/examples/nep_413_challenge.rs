use base64::prelude::*;
use ed25519_dalek::{Signer as _, SigningKey};
use near_passport::types::nep413::{self, Payload};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let key = SigningKey::from_bytes(&[7; 32]);
    let public_key = format!(
        "ed25519:{}",
        bs58::encode(key.verifying_key().to_bytes()).into_string()
    );

    let mut nonce = [0u8; 32];
    nonce[..8].copy_from_slice(&1_750_000_000_000u64.to_be_bytes());

    // What a wallet signs for `signMessage`.
    let payload = Payload::new("Identify myself", &nonce, "alice.near")?;
    let hash = payload.compute_hash()?;
    let signature = BASE64_STANDARD.encode(key.sign(&hash.0).to_bytes());

    println!("Hash: {}", hex::encode(hash.0));
    println!("Signature: {signature}");

    let result = nep413::verify(
        "Identify myself",
        &signature,
        &public_key,
        &nonce,
        "alice.near",
    );
    assert!(result.valid, "{:?}", result.error);

    Ok(())
}
