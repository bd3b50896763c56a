use crate::config::{CipherMode, Role};
use crate::keystream::KeystreamGenerator;

/// Which way a payload is travelling through the cipher. XOR ciphers treat
/// both the same, the tag only documents intent at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    Encrypt,
    Decrypt,
}

/// Direction of travel across the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// tunnel-client to tunnel-server
    Upstream,
    /// tunnel-server to tunnel-client
    Downstream,
}

impl Direction {
    /// First IV used by a fresh keystream for this direction.
    pub fn initial_iv(self) -> u64 {
        match self {
            Direction::Downstream => 1,
            Direction::Upstream => 2,
        }
    }
}

/// Payload transform applied to every relayed buffer.
///
/// Implementations are stateful: buffers must be processed in wire order by
/// exactly one caller at a time.
pub trait PayloadCipher: Send {
    fn process(&mut self, data: &[u8], op: CipherOp) -> Vec<u8>;
}

/// XORs each byte with the next eight keystream bits, least-significant bit first.
pub struct KeystreamCipher {
    generator: KeystreamGenerator,
    secret: Vec<u8>,
    iv: u64,
    processed: u64,
}

impl KeystreamCipher {
    /// Fresh cipher; the first IV in use is 1.
    pub fn new(secret: &[u8]) -> Self {
        let mut cipher = Self::with_iv(secret, 0);
        cipher.reseed();
        cipher
    }

    pub fn with_iv(secret: &[u8], iv: u64) -> Self {
        let mut generator = KeystreamGenerator::reference();
        generator.seed(secret, iv);
        Self {
            generator,
            secret: secret.to_vec(),
            iv,
            processed: 0,
        }
    }

    /// Advances to the next IV and restarts the keystream from it.
    pub fn reseed(&mut self) {
        self.iv += 1;
        self.generator.seed(&self.secret, self.iv);
    }

    pub fn iv(&self) -> u64 {
        self.iv
    }

    /// Bytes processed since construction.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl PayloadCipher for KeystreamCipher {
    fn process(&mut self, data: &[u8], _op: CipherOp) -> Vec<u8> {
        self.processed += data.len() as u64;
        data.iter()
            .map(|&byte| {
                (0..8).fold(byte, |acc, position| {
                    acc ^ (self.generator.next_bit() << position)
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for KeystreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystreamCipher")
            .field("iv", &self.iv)
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

/// Identity transform used by the legacy one-way mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCipher;

impl PayloadCipher for NoCipher {
    fn process(&mut self, data: &[u8], _op: CipherOp) -> Vec<u8> {
        data.to_vec()
    }
}

/// One direction's cipher as owned by a channel.
#[derive(Debug)]
pub enum CipherRole {
    Keystream(KeystreamCipher),
    Identity(NoCipher),
}

impl CipherRole {
    fn keystream(secret: &[u8], direction: Direction) -> Self {
        CipherRole::Keystream(KeystreamCipher::with_iv(secret, direction.initial_iv()))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CipherRole::Identity(_))
    }
}

impl PayloadCipher for CipherRole {
    fn process(&mut self, data: &[u8], op: CipherOp) -> Vec<u8> {
        match self {
            CipherRole::Keystream(c) => c.process(data, op),
            CipherRole::Identity(c) => c.process(data, op),
        }
    }
}

/// Freshly seeded `(send, receive)` ciphers for one channel.
pub fn cipher_pair(secret: &[u8], mode: CipherMode, role: Role) -> (CipherRole, CipherRole) {
    let (send_dir, recv_dir) = match role {
        Role::Server => (Direction::Downstream, Direction::Upstream),
        Role::Client => (Direction::Upstream, Direction::Downstream),
    };
    match (mode, role) {
        (CipherMode::Symmetric, _) => (
            CipherRole::keystream(secret, send_dir),
            CipherRole::keystream(secret, recv_dir),
        ),
        // Only server-to-client traffic is encrypted in the legacy wire format.
        (CipherMode::Legacy, Role::Server) => (
            CipherRole::keystream(secret, Direction::Downstream),
            CipherRole::Identity(NoCipher),
        ),
        (CipherMode::Legacy, Role::Client) => (
            CipherRole::Identity(NoCipher),
            CipherRole::keystream(secret, Direction::Downstream),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn matches_reference_ciphertext() {
        let mut cipher = KeystreamCipher::new(b"abc");
        assert_eq!(cipher.iv(), 1);
        let out = cipher.process(b"hello", CipherOp::Encrypt);
        assert_eq!(out, [0x08, 0x0e, 0x04, 0x85, 0xd1]);
    }

    #[test]
    fn keystream_bytes_for_zero_input() {
        let mut cipher = KeystreamCipher::new(b"abc");
        let first = cipher.process(&[0u8; 16], CipherOp::Encrypt);
        assert_eq!(
            first,
            [
                0x60, 0x6b, 0x68, 0xe9, 0xbe, 0x9e, 0x20, 0x4a, 0x5f, 0x4b, 0x16, 0xf1, 0xf1, 0x30,
                0x6d, 0x89
            ]
        );

        let mut reseeded = KeystreamCipher::new(b"abc");
        reseeded.reseed();
        assert_eq!(reseeded.iv(), 2);
        assert_eq!(
            reseeded.process(&[0u8; 8], CipherOp::Encrypt),
            [0x1d, 0xa2, 0xdd, 0x79, 0x76, 0x18, 0xb5, 0x1d]
        );
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let len = rng.gen_range(0..2048);
            let mut message = vec![0u8; len];
            rng.fill(&mut message[..]);

            let mut encoder = KeystreamCipher::new(b"shared");
            let mut decoder = KeystreamCipher::new(b"shared");
            let ciphertext = encoder.process(&message, CipherOp::Encrypt);
            assert_eq!(decoder.process(&ciphertext, CipherOp::Decrypt), message);
        }
    }

    #[test]
    fn chunking_does_not_change_output() {
        let message: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut whole = KeystreamCipher::new(b"abc");
        let expected = whole.process(&message, CipherOp::Encrypt);

        let mut pieces = KeystreamCipher::new(b"abc");
        let mut actual = Vec::new();
        for chunk in message.chunks(7) {
            actual.extend(pieces.process(chunk, CipherOp::Encrypt));
        }
        assert_eq!(actual, expected);
        assert_eq!(pieces.processed(), 1000);
    }

    #[test]
    fn symmetric_pairs_line_up_across_roles() {
        let (mut client_send, mut client_recv) =
            cipher_pair(b"k", CipherMode::Symmetric, Role::Client);
        let (mut server_send, mut server_recv) =
            cipher_pair(b"k", CipherMode::Symmetric, Role::Server);

        let up = client_send.process(b"request", CipherOp::Encrypt);
        assert_ne!(up, b"request");
        assert_eq!(server_recv.process(&up, CipherOp::Decrypt), b"request");

        let down = server_send.process(b"response", CipherOp::Encrypt);
        assert_ne!(down, b"response");
        assert_eq!(client_recv.process(&down, CipherOp::Decrypt), b"response");
    }

    #[test]
    fn legacy_pairs_encrypt_downstream_only() {
        let (mut client_send, mut client_recv) =
            cipher_pair(b"k", CipherMode::Legacy, Role::Client);
        let (mut server_send, mut server_recv) =
            cipher_pair(b"k", CipherMode::Legacy, Role::Server);
        assert!(client_send.is_identity());
        assert!(server_recv.is_identity());

        let up = client_send.process(b"request", CipherOp::Encrypt);
        assert_eq!(up, b"request");
        assert_eq!(server_recv.process(&up, CipherOp::Decrypt), b"request");

        let down = server_send.process(b"response", CipherOp::Encrypt);
        assert_ne!(down, b"response");
        assert_eq!(client_recv.process(&down, CipherOp::Decrypt), b"response");
    }
}
