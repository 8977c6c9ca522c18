//! Incremental container encryption and decryption.
//!
//! The payload length is not known up front when decrypting, so the last 32
//! bytes seen so far are always withheld: they might be the tag. Only bytes
//! followed by at least 32 more are decrypted and released.

use std::io::{self, Read, Write};

use tracing::warn;
use zeroize::{Zeroize, Zeroizing};

use super::Limits;
use crate::crypto::{self, Header, PayloadCipher, SALT_LEN, TAG_LEN, TagComputer};
use crate::crypto::header::PREFIX_LEN;
use crate::error::{Error, Result};
use crate::params::{Budget, CostParameters, CostPolicy};
use crate::record::{open_header, seal_header};

/// Bytes read from the input per step.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Encrypts a payload piece by piece after the header has been emitted.
pub struct Encryptor {
    cipher: PayloadCipher,
    mac: TagComputer,
}

impl Encryptor {
    /// Derives keys for `password` with a fresh salt and returns the encryptor
    /// together with the header that must precede the ciphertext.
    pub fn new(password: &[u8], params: &CostParameters) -> Result<(Self, Header)> {
        let salt = crypto::generate_salt()?;
        Self::with_salt(password, params, &salt)
    }

    pub(crate) fn with_salt(
        password: &[u8],
        params: &CostParameters,
        salt: &[u8; SALT_LEN],
    ) -> Result<(Self, Header)> {
        let (header, dk) = seal_header(password, params, salt)?;
        let mut mac = TagComputer::new(dk.mac_key());
        mac.update(header.as_bytes());
        let encryptor = Self {
            cipher: PayloadCipher::new(dk.cipher_key()),
            mac,
        };
        Ok((encryptor, header))
    }

    /// Encrypts `chunk` in place and adds the ciphertext to the tag.
    pub fn update(&mut self, chunk: &mut [u8]) {
        self.cipher.apply(chunk);
        self.mac.update(chunk);
    }

    /// The tag that follows the last ciphertext byte.
    pub fn finalize(self) -> [u8; TAG_LEN] {
        self.mac.finalize()
    }
}

enum State {
    AwaitingPrefix,
    AwaitingRemainder,
    Payload {
        cipher: PayloadCipher,
        mac: TagComputer,
    },
    Failed,
}

/// Push-based container decryption.
///
/// Feed input with [`Decryptor::update`] in pieces of any size, then call
/// [`Decryptor::finish`] at end of input. Output released by `update` is not
/// authenticated until `finish` succeeds.
pub struct Decryptor {
    state: State,
    password: Zeroizing<Vec<u8>>,
    limits: Limits,
    header: Vec<u8>,
    tail: Zeroizing<Vec<u8>>,
}

impl Decryptor {
    pub fn new(password: &[u8], limits: Limits) -> Self {
        Self {
            state: State::AwaitingPrefix,
            password: Zeroizing::new(password.to_vec()),
            limits,
            header: Vec::with_capacity(Header::LEN),
            tail: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE + TAG_LEN)),
        }
    }

    /// Consumes `input`, appending any plaintext that is provably not part of
    /// the tag to `output`.
    ///
    /// # Errors
    ///
    /// Header errors as in [`super::decrypt_buffer`]. After an error the
    /// decryptor is unusable and reports [`Error::AuthenticationMismatch`].
    pub fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let result = self.advance(input, output);
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Verifies the withheld tag at end of input.
    ///
    /// # Errors
    ///
    /// [`Error::TruncatedInput`] if fewer than 128 bytes were supplied,
    /// [`Error::AuthenticationMismatch`] if the tag does not match.
    pub fn finish(mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::AwaitingPrefix | State::AwaitingRemainder => Err(Error::TruncatedInput),
            State::Payload { mac, .. } => {
                if self.tail.len() < TAG_LEN {
                    return Err(Error::TruncatedInput);
                }
                if mac.verify(&self.tail) {
                    Ok(())
                } else {
                    warn!("container tag mismatch");
                    Err(Error::AuthenticationMismatch)
                }
            }
            State::Failed => Err(Error::AuthenticationMismatch),
        }
    }

    fn advance(&mut self, mut input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        loop {
            match &mut self.state {
                State::AwaitingPrefix => {
                    input = self.fill_header(input, PREFIX_LEN);
                    if self.header.len() < PREFIX_LEN {
                        return Ok(());
                    }
                    Header::check_prefix(&self.header)?;
                    self.state = State::AwaitingRemainder;
                }
                State::AwaitingRemainder => {
                    input = self.fill_header(input, Header::LEN);
                    if self.header.len() < Header::LEN {
                        return Ok(());
                    }
                    self.state = self.open()?;
                }
                State::Payload { cipher, mac } => {
                    // The tail never holds more than one chunk plus a tag.
                    for piece in input.chunks(CHUNK_SIZE) {
                        self.tail.extend_from_slice(piece);
                        if self.tail.len() > TAG_LEN {
                            let ready = self.tail.len() - TAG_LEN;
                            mac.update(&self.tail[..ready]);
                            let start = output.len();
                            output.extend_from_slice(&self.tail[..ready]);
                            cipher.apply(&mut output[start..]);
                            self.tail.drain(..ready);
                        }
                    }
                    return Ok(());
                }
                State::Failed => return Err(Error::AuthenticationMismatch),
            }
        }
    }

    fn fill_header<'a>(&mut self, input: &'a [u8], upto: usize) -> &'a [u8] {
        let take = upto.saturating_sub(self.header.len()).min(input.len());
        self.header.extend_from_slice(&input[..take]);
        &input[take..]
    }

    fn open(&mut self) -> Result<State> {
        let header = Header::parse(&self.header)?;
        let budget = self.limits.resolve()?;
        let dk = open_header(&header, &self.password, Some(&budget))?;
        self.password.zeroize();

        let mut mac = TagComputer::new(dk.mac_key());
        mac.update(header.as_bytes());
        Ok(State::Payload {
            cipher: PayloadCipher::new(dk.cipher_key()),
            mac,
        })
    }

    fn fail(&mut self) {
        self.state = State::Failed;
        self.password.zeroize();
        self.tail.zeroize();
    }
}

fn read_chunk<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Reads `input` to the end and writes a container to `output`, choosing
/// parameters for `policy`.
pub fn encrypt_stream<R: Read, W: Write>(
    input: R,
    output: W,
    password: &[u8],
    policy: &CostPolicy,
) -> Result<()> {
    encrypt_stream_with_budget(input, output, password, &Budget::measure(policy)?)
}

pub fn encrypt_stream_with_budget<R: Read, W: Write>(
    input: R,
    output: W,
    password: &[u8],
    budget: &Budget,
) -> Result<()> {
    encrypt_stream_with_params(input, output, password, &budget.select())
}

pub fn encrypt_stream_with_params<R: Read, W: Write>(
    input: R,
    output: W,
    password: &[u8],
    params: &CostParameters,
) -> Result<()> {
    let (encryptor, header) = Encryptor::new(password, params)?;
    encrypt_into(encryptor, &header, input, output)
}

pub(crate) fn encrypt_into<R: Read, W: Write>(
    mut encryptor: Encryptor,
    header: &Header,
    mut input: R,
    mut output: W,
) -> Result<()> {
    output.write_all(header.as_bytes()).map_err(Error::Write)?;

    let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
    loop {
        let n = read_chunk(&mut input, &mut buf).map_err(Error::Read)?;
        if n == 0 {
            break;
        }
        encryptor.update(&mut buf[..n]);
        output.write_all(&buf[..n]).map_err(Error::Write)?;
    }

    output.write_all(&encryptor.finalize()).map_err(Error::Write)?;
    output.flush().map_err(Error::Write)?;
    Ok(())
}

/// Decrypts a container from `input` to `output`, checking the stored
/// parameters against `policy`.
///
/// Plaintext is written as it is decrypted; if this returns an error, what
/// was written must be discarded.
pub fn decrypt_stream<R: Read, W: Write>(
    input: R,
    output: W,
    password: &[u8],
    policy: &CostPolicy,
) -> Result<()> {
    decrypt_with(input, output, Decryptor::new(password, Limits::Policy(*policy)))
}

pub fn decrypt_stream_with_budget<R: Read, W: Write>(
    input: R,
    output: W,
    password: &[u8],
    budget: &Budget,
) -> Result<()> {
    decrypt_with(input, output, Decryptor::new(password, Limits::Budget(*budget)))
}

fn decrypt_with<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    mut decryptor: Decryptor,
) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut plaintext = Zeroizing::new(Vec::with_capacity(CHUNK_SIZE + TAG_LEN));
    loop {
        let n = read_chunk(&mut input, &mut buf).map_err(Error::Read)?;
        if n == 0 {
            break;
        }
        plaintext.clear();
        decryptor.update(&buf[..n], &mut plaintext)?;
        output.write_all(&plaintext).map_err(Error::Write)?;
    }
    decryptor.finish()?;
    output.flush().map_err(Error::Write)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{MIN_CONTAINER_LEN, decrypt_buffer_with_budget, encrypt_with_salt};
    use crate::crypto::kdf::DERIVATIONS;
    use crate::params::tests::{test_budget, test_params};
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream_with_params(plaintext, &mut out, b"pw", &test_params()).unwrap();
        out
    }

    fn decrypt(container: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream_with_budget(container, &mut out, b"pw", &test_budget())?;
        Ok(out)
    }

    #[test]
    fn stream_roundtrip() {
        let data = b"streamed secret".repeat(10_000);
        let container = encrypt(&data);
        assert_eq!(container.len(), data.len() + MIN_CONTAINER_LEN);
        assert_eq!(decrypt(&container).unwrap(), data);
    }

    #[test]
    fn stream_and_buffer_are_interchangeable() {
        let data = vec![0x5au8; 3 * CHUNK_SIZE + 17];
        let stream = encrypt(&data);
        let plain = decrypt_buffer_with_budget(&stream, b"pw", &test_budget()).unwrap();
        assert_eq!(&plain[..], &data[..]);

        let buffer = crate::container::encrypt_buffer_with_params(&data, b"pw", &test_params())
            .unwrap();
        assert_eq!(decrypt(&buffer).unwrap(), data);
    }

    #[test]
    fn stream_and_buffer_are_byte_identical_for_same_salt() {
        let data = b"same bytes either way".repeat(5000);
        let salt = [9u8; SALT_LEN];

        let buffer = encrypt_with_salt(&data, b"pw", &test_params(), &salt).unwrap();

        let (encryptor, header) = Encryptor::with_salt(b"pw", &test_params(), &salt).unwrap();
        let mut stream = Vec::new();
        encrypt_into(encryptor, &header, &data[..], &mut stream).unwrap();

        assert_eq!(buffer, stream);
    }

    #[test]
    fn single_byte_reads_roundtrip() {
        let data = b"one byte at a time, the tail still has to be withheld".to_vec();
        let container = encrypt(&data);

        let mut out = Vec::new();
        decrypt_stream_with_budget(
            Trickle {
                data: &container,
                step: 1,
            },
            &mut out,
            b"pw",
            &test_budget(),
        )
        .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn tail_is_withheld_until_more_input_arrives() {
        let data = vec![7u8; 100];
        let container = encrypt(&data);
        let mut decryptor = Decryptor::new(b"pw", Limits::Budget(test_budget()));

        let mut out = Vec::new();
        decryptor.update(&container[..Header::LEN + 40], &mut out).unwrap();
        assert_eq!(out.len(), 8);

        decryptor.update(&container[Header::LEN + 40..], &mut out).unwrap();
        assert_eq!(out, data);
        decryptor.finish().unwrap();
    }

    #[test]
    fn large_update_keeps_tail_bounded() {
        let data = vec![3u8; 3 * CHUNK_SIZE + 5];
        let container = encrypt(&data);
        let mut decryptor = Decryptor::new(b"pw", Limits::Budget(test_budget()));

        let mut out = Vec::new();
        decryptor.update(&container, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(decryptor.tail.len(), TAG_LEN);
        assert!(decryptor.tail.capacity() < 2 * CHUNK_SIZE);
        decryptor.finish().unwrap();
    }

    #[test]
    fn write_failures_report_write_errors() {
        struct Full;

        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::StorageFull.into())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let result = encrypt_stream_with_params(&b"data"[..], Full, b"pw", &test_params());
        assert!(matches!(result, Err(Error::Write(_))));
        assert_eq!(result.unwrap_err().code(), 12);

        let container = encrypt(b"data");
        let result = decrypt_stream_with_budget(&container[..], Full, b"pw", &test_budget());
        assert!(matches!(result, Err(Error::Write(_))));
    }

    #[test]
    fn read_failures_report_read_errors() {
        struct Broken;

        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
        }

        let mut out = Vec::new();
        let result = decrypt_stream_with_budget(Broken, &mut out, b"pw", &test_budget());
        assert!(matches!(result, Err(Error::Read(_))));
        assert_eq!(result.unwrap_err().code(), 13);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let container = encrypt(b"");
        assert_eq!(container.len(), MIN_CONTAINER_LEN);
        assert!(decrypt(&container).unwrap().is_empty());
    }

    #[test]
    fn wrong_password_fails() {
        let container = encrypt(b"data");
        let mut out = Vec::new();
        let result = decrypt_stream_with_budget(&container[..], &mut out, b"nope", &test_budget());
        assert!(matches!(result, Err(Error::IncorrectPassword)));
        assert!(out.is_empty());
    }

    #[test]
    fn tampered_tag_fails() {
        let mut container = encrypt(b"data data data");
        let last = container.len() - 1;
        container[last] ^= 0x01;
        assert!(matches!(decrypt(&container), Err(Error::AuthenticationMismatch)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut container = encrypt(&[1u8; 1000]);
        container[Header::LEN + 500] ^= 0x10;
        assert!(matches!(decrypt(&container), Err(Error::AuthenticationMismatch)));
    }

    #[test]
    fn truncated_stream_fails() {
        let container = encrypt(b"hello");
        for len in [0, 3, 7, 60, 96, 100, 127] {
            assert!(
                matches!(decrypt(&container[..len]), Err(Error::TruncatedInput)),
                "length {len}"
            );
        }
    }

    #[test]
    fn wrong_magic_fails_before_derivation() {
        let mut container = encrypt(b"hello");
        container[0] = b'x';
        let before = DERIVATIONS.with(|count| count.get());
        let mut out = Vec::new();
        let result = decrypt_stream(&container[..], &mut out, b"pw", &CostPolicy::default());
        assert!(matches!(result, Err(Error::FormatMismatch)));
        assert_eq!(DERIVATIONS.with(|count| count.get()), before);
    }

    #[test]
    fn failed_decryptor_stays_failed() {
        let mut container = encrypt(b"hello");
        container[0] = b'x';
        let mut decryptor = Decryptor::new(b"pw", Limits::Budget(test_budget()));
        let mut out = Vec::new();
        assert!(decryptor.update(&container, &mut out).is_err());
        assert!(decryptor.update(&container, &mut out).is_err());
        assert!(decryptor.finish().is_err());
    }

    #[test]
    fn cursor_io_roundtrip() {
        let data = vec![42u8; 10_000];
        let mut container = Cursor::new(Vec::new());
        encrypt_stream_with_params(Cursor::new(&data), &mut container, b"pw", &test_params())
            .unwrap();

        let mut out = Cursor::new(Vec::new());
        decrypt_stream_with_budget(
            Cursor::new(container.into_inner()),
            &mut out,
            b"pw",
            &test_budget(),
        )
        .unwrap();
        assert_eq!(out.into_inner(), data);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn any_read_size_roundtrips(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            step in 1usize..200,
        ) {
            let container = encrypt(&payload);
            let mut out = Vec::new();
            decrypt_stream_with_budget(
                Trickle { data: &container, step },
                &mut out,
                b"pw",
                &test_budget(),
            )
            .unwrap();
            prop_assert_eq!(out, payload);
        }
    }
}
