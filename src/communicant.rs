//! Typed wire codec and connection lifecycle over an ordered byte stream
//! (spec C4).
//!
//! `Communicant<S>` is generic over any `Read + Write` channel, the same way
//! `other_examples/.../WolofSHIELD-Paillier_rsc`'s client/server binaries
//! drive a `TcpStream` directly rather than behind an async runtime — this
//! crate's protocol is single-threaded/cooperative per spec §5, so a plain
//! blocking `Read + Write` bound is the right fit and lets tests substitute
//! an in-memory duplex pipe for a real socket.

use std::io::{self, Read, Write};
use std::time::Duration;

use num_bigint::BigUint;

use crate::bigint;
use crate::element::Element;
use crate::error::SyncError;

/// Connection lifecycle states (spec C4). Server and client each follow
/// their own path to `Connected`; both converge on `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Newly constructed, no I/O attempted yet.
    Fresh,
    /// Server only: bound and accepting.
    Listening,
    /// Client only: dialing a peer.
    Connecting,
    /// Handshake may proceed (or has completed).
    Connected,
    /// Session over; no further I/O permitted.
    Closed,
}

/// A length-prefixed typed channel plus per-session byte counters and
/// connection state (spec C4).
pub struct Communicant<S> {
    stream: S,
    state: ConnState,
    xmit_bytes: u64,
    recv_bytes: u64,
    modulus: Option<BigUint>,
    is_server: bool,
}

impl<S> Communicant<S> {
    /// Wrap a fresh channel. `is_server` selects which half of the
    /// lifecycle state machine (`Listening` vs `Connecting`) applies.
    pub fn new(stream: S, is_server: bool) -> Self {
        Self {
            stream,
            state: ConnState::Fresh,
            xmit_bytes: 0,
            recv_bytes: 0,
            modulus: None,
            is_server,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Bytes transmitted this session (spec C4: "monotone").
    pub fn xmit_bytes(&self) -> u64 {
        self.xmit_bytes
    }

    /// Bytes received this session.
    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    /// The negotiated field modulus, once the handshake has completed.
    pub fn modulus(&self) -> Option<&BigUint> {
        self.modulus.as_ref()
    }

    /// Server transition: `Fresh -> Listening`.
    pub fn comm_listen(&mut self) {
        debug_assert_eq!(self.state, ConnState::Fresh);
        self.state = ConnState::Listening;
    }

    /// Client transition: `Fresh -> Connecting`.
    pub fn comm_connect(&mut self) {
        debug_assert_eq!(self.state, ConnState::Fresh);
        self.state = ConnState::Connecting;
    }

    /// Transition into `Connected` once the underlying channel is usable
    /// (accepted connection server-side, established socket client-side).
    pub fn mark_connected(&mut self) {
        debug_assert!(matches!(self.state, ConnState::Listening | ConnState::Connecting));
        self.state = ConnState::Connected;
    }

    /// Transition to `Closed`. Idempotent.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

impl<S: Read + Write> Communicant<S> {
    fn write_all_counted(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
        self.stream.write_all(bytes)?;
        self.xmit_bytes += bytes.len() as u64;
        Ok(())
    }

    fn read_exact_counted(&mut self, buf: &mut [u8]) -> Result<(), SyncError> {
        match self.stream.read_exact(buf) {
            Ok(()) => {
                self.recv_bytes += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SyncError::ChannelClosed),
            Err(e) => Err(SyncError::Io(e)),
        }
    }

    /// Send a single byte.
    pub fn send_byte(&mut self, b: u8) -> Result<(), SyncError> {
        self.write_all_counted(&[b])
    }

    /// Receive a single byte.
    pub fn recv_byte(&mut self) -> Result<u8, SyncError> {
        let mut buf = [0u8; 1];
        self.read_exact_counted(&mut buf)?;
        Ok(buf[0])
    }

    /// Send a fixed-width big-endian `u32`.
    pub fn send_u32(&mut self, v: u32) -> Result<(), SyncError> {
        self.write_all_counted(&v.to_be_bytes())
    }

    /// Receive a fixed-width big-endian `u32`.
    pub fn recv_u32(&mut self) -> Result<u32, SyncError> {
        let mut buf = [0u8; 4];
        self.read_exact_counted(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Send a fixed-width big-endian `u64`.
    pub fn send_u64(&mut self, v: u64) -> Result<(), SyncError> {
        self.write_all_counted(&v.to_be_bytes())
    }

    /// Receive a fixed-width big-endian `u64`.
    pub fn recv_u64(&mut self) -> Result<u64, SyncError> {
        let mut buf = [0u8; 8];
        self.read_exact_counted(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Send a non-negative big integer: `len:u32` then `len` big-endian
    /// magnitude bytes (spec C4; sign byte reserved, unused — this system
    /// only ever carries non-negative values).
    pub fn send_bigint(&mut self, v: &BigUint) -> Result<(), SyncError> {
        let bytes = bigint::to_be_bytes(v);
        self.send_u32(bytes.len() as u32)?;
        self.write_all_counted(&bytes)
    }

    /// Receive a big integer encoded by [`Self::send_bigint`].
    pub fn recv_bigint(&mut self) -> Result<BigUint, SyncError> {
        let len = self.recv_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact_counted(&mut buf)?;
        Ok(bigint::from_be_bytes(&buf))
    }

    /// Send a fixed-width big-endian `i64`.
    pub fn send_i64(&mut self, v: i64) -> Result<(), SyncError> {
        self.write_all_counted(&v.to_be_bytes())
    }

    /// Receive a fixed-width big-endian `i64`.
    pub fn recv_i64(&mut self) -> Result<i64, SyncError> {
        let mut buf = [0u8; 8];
        self.read_exact_counted(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Send a byte blob: `len:u32` then `len` raw bytes (spec C4; used for
    /// IBLT cell payloads and Cuckoo filter rows, which are fixed-shape
    /// binary data rather than field elements).
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
        self.send_u32(bytes.len() as u32)?;
        self.write_all_counted(bytes)
    }

    /// Receive a byte blob sent by [`Self::send_bytes`].
    pub fn recv_bytes(&mut self) -> Result<Vec<u8>, SyncError> {
        let len = self.recv_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact_counted(&mut buf)?;
        Ok(buf)
    }

    /// Send an element: its canonical big integer encoding (spec C4).
    pub fn send_element(&mut self, elem: &Element) -> Result<(), SyncError> {
        self.send_bigint(elem.as_integer())
    }

    /// Receive an element.
    pub fn recv_element(&mut self) -> Result<Element, SyncError> {
        let v = self.recv_bigint()?;
        Ok(Element::from_integer(v))
    }

    /// Send an element list: `count:u32` then `count` element encodings.
    pub fn send_element_list(&mut self, elems: &[Element]) -> Result<(), SyncError> {
        self.send_u32(elems.len() as u32)?;
        for e in elems {
            self.send_element(e)?;
        }
        Ok(())
    }

    /// Receive an element list.
    pub fn recv_element_list(&mut self) -> Result<Vec<Element>, SyncError> {
        let count = self.recv_u32()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.recv_element()?);
        }
        Ok(out)
    }

    /// Send an IBLT: shape header (`numCells, k, eltSize, mode`) then each
    /// cell's `(count, keySum, valueSum, hashSum)` in order (spec C4).
    pub fn send_iblt(&mut self, table: &crate::iblt::Iblt) -> Result<(), SyncError> {
        self.send_u32(table.num_cells())?;
        self.send_u32(table.k())?;
        self.send_u32(table.elt_size() as u32)?;
        self.send_byte(match table.mode() {
            crate::iblt::IbltMode::Set => 0,
            crate::iblt::IbltMode::Multiset => 1,
        })?;
        for cell in table.cells() {
            self.send_i64(cell.count())?;
            self.send_bytes(cell.key_sum())?;
            self.send_bytes(cell.value_sum())?;
            self.send_u64(cell.hash_sum())?;
        }
        Ok(())
    }

    /// Receive an IBLT sent by [`Self::send_iblt`].
    pub fn recv_iblt(&mut self) -> Result<crate::iblt::Iblt, SyncError> {
        let num_cells = self.recv_u32()?;
        let k = self.recv_u32()?;
        let elt_size = self.recv_u32()? as usize;
        let mode = match self.recv_byte()? {
            0 => crate::iblt::IbltMode::Set,
            _ => crate::iblt::IbltMode::Multiset,
        };
        let mut cells = Vec::with_capacity(num_cells as usize);
        for _ in 0..num_cells {
            let count = self.recv_i64()?;
            let key_sum = self.recv_bytes()?;
            let value_sum = self.recv_bytes()?;
            let hash_sum = self.recv_u64()?;
            cells.push(crate::iblt::IbltCell::from_parts(count, key_sum, value_sum, hash_sum));
        }
        Ok(crate::iblt::Iblt::from_cells(cells, k, elt_size, mode))
    }

    /// Send a Cuckoo filter: shape header `(fingerprint_bits, bucket_size,
    /// num_buckets)` then each row bit-packed row-major, byte-aligned per
    /// row (spec §4.6/C4) via [`Self::send_bytes`].
    pub fn send_cuckoo(&mut self, filter: &crate::cuckoo::CuckooFilter) -> Result<(), SyncError> {
        self.send_u32(filter.fingerprint_bits())?;
        self.send_u32(filter.bucket_size() as u32)?;
        self.send_u32(filter.num_buckets())?;
        for row in filter.rows() {
            self.send_bytes(&pack_row(row, filter.fingerprint_bits()))?;
        }
        Ok(())
    }

    /// Receive a Cuckoo filter sent by [`Self::send_cuckoo`]. `max_kicks` is
    /// a local parameter, not carried on the wire (spec §4.6: only the
    /// filter's shape and contents are exchanged).
    pub fn recv_cuckoo(&mut self, max_kicks: u32) -> Result<crate::cuckoo::CuckooFilter, SyncError> {
        let fingerprint_bits = self.recv_u32()?;
        let bucket_size = self.recv_u32()? as usize;
        let num_buckets = self.recv_u32()?;
        let mut rows = Vec::with_capacity(num_buckets as usize);
        for _ in 0..num_buckets {
            let packed = self.recv_bytes()?;
            rows.push(unpack_row(&packed, bucket_size, fingerprint_bits));
        }
        Ok(crate::cuckoo::CuckooFilter::from_rows(fingerprint_bits, max_kicks, rows))
    }

    /// Field modulus handshake (spec C4): the caller's side writes its own
    /// `p`, reads the peer's `p`, and fails with
    /// [`SyncError::ParameterMismatch`] if they disagree. This MUST be the
    /// first exchange after `Connected` (spec §5), so callers invoke it
    /// immediately after [`Self::mark_connected`].
    pub fn establish_modulus(&mut self, own_modulus: &BigUint) -> Result<BigUint, SyncError> {
        debug_assert_eq!(self.state, ConnState::Connected, "handshake must be the first exchange");
        self.send_bigint(own_modulus)?;
        let peer_modulus = self.recv_bigint()?;
        if &peer_modulus != own_modulus {
            self.close();
            return Err(SyncError::SyncSetupFailure(format!(
                "modulus mismatch: local={own_modulus}, peer={peer_modulus}"
            )));
        }
        self.modulus = Some(peer_modulus.clone());
        tracing::debug!(is_server = self.is_server, modulus_bits = peer_modulus.bits(), "modulus handshake ok");
        Ok(peer_modulus)
    }
}

/// Pack one Cuckoo bucket row into a bitstream, `fingerprint_bits` wide per
/// fingerprint, most-significant-bit first, padded with zero bits to the
/// next byte boundary at the row's end (spec §4.6: byte-aligned per row, not
/// per fingerprint or across the whole table).
fn pack_row(row: &[u16], fingerprint_bits: u32) -> Vec<u8> {
    let mut buf: u64 = 0;
    let mut buf_bits: u32 = 0;
    let mut out = Vec::with_capacity((row.len() * fingerprint_bits as usize + 7) / 8);
    for &fp in row {
        buf = (buf << fingerprint_bits) | fp as u64;
        buf_bits += fingerprint_bits;
        while buf_bits >= 8 {
            buf_bits -= 8;
            out.push((buf >> buf_bits) as u8);
        }
    }
    if buf_bits > 0 {
        out.push((buf << (8 - buf_bits)) as u8);
    }
    out
}

/// Inverse of [`pack_row`].
fn unpack_row(bytes: &[u8], bucket_size: usize, fingerprint_bits: u32) -> Vec<u16> {
    let mask = (1u64 << fingerprint_bits) - 1;
    let mut buf: u64 = 0;
    let mut buf_bits: u32 = 0;
    let mut bytes = bytes.iter();
    let mut out = Vec::with_capacity(bucket_size);
    for _ in 0..bucket_size {
        while buf_bits < fingerprint_bits {
            let b = bytes.next().copied().unwrap_or(0);
            buf = (buf << 8) | b as u64;
            buf_bits += 8;
        }
        buf_bits -= fingerprint_bits;
        out.push(((buf >> buf_bits) & mask) as u16);
    }
    out
}

/// A channel that supports an optional per-recv deadline (spec §5: "The
/// channel exposes an optional per-recv deadline"). Implemented for
/// [`std::net::TcpStream`]; in-memory test channels may opt out by simply
/// not implementing it (timeouts are then unavailable on that channel, not
/// silently ignored — callers who need timeouts pick a channel that
/// implements this trait).
pub trait TimeoutChannel {
    /// Set (or clear, with `None`) the read timeout.
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

impl TimeoutChannel for std::net::TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        std::net::TcpStream::set_read_timeout(self, dur)
    }
}

impl<S: Read + Write + TimeoutChannel> Communicant<S> {
    /// Arm a per-recv deadline on the underlying channel. Expiry surfaces
    /// as [`SyncError::Timeout`] on the next recv (spec §5: "Expiry raises
    /// timeout; the engine must not retry the exchange").
    pub fn set_recv_deadline(&mut self, dur: Option<Duration>) -> Result<(), SyncError> {
        self.stream.set_read_timeout(dur)?;
        Ok(())
    }

    /// Like [`Self::recv_u32`] but maps a platform timeout error to
    /// [`SyncError::Timeout`] instead of a generic I/O error.
    pub fn recv_u32_with_deadline(&mut self) -> Result<u32, SyncError> {
        match self.recv_u32() {
            Err(SyncError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Err(SyncError::Timeout)
            }
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_channel {
    //! An in-memory duplex byte channel for exercising the protocol without
    //! real sockets, grounded on the same "swap in a non-network channel
    //! for tests" idea as the reference crate's `stream::SliceTileStream`
    //! standing in for a real streaming source.
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct Pipe {
        inbound: Arc<Mutex<VecDeque<u8>>>,
        outbound: Arc<Mutex<VecDeque<u8>>>,
    }

    /// Build a connected pair: `a`'s writes are `b`'s reads and vice versa.
    pub fn duplex_pair() -> (Pipe, Pipe) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
        let a = Pipe { inbound: b_to_a.clone(), outbound: a_to_b.clone() };
        let b = Pipe { inbound: a_to_b, outbound: b_to_a };
        (a, b)
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // Bounded spin-wait so two communicants driven from separate
            // threads can interleave sends/recvs realistically; once the
            // wait is exhausted the channel is treated as closed (EOF),
            // matching a peer that hung up.
            for _ in 0..200 {
                let mut q = self.inbound.lock().unwrap();
                if !q.is_empty() {
                    let n = buf.len().min(q.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = q.pop_front().unwrap();
                    }
                    return Ok(n);
                }
                drop(q);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "pipe empty"))
        }
    }
    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.lock().unwrap().extend(buf.iter().copied());
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_channel::duplex_pair;
    use super::*;

    #[test]
    fn primitives_roundtrip_over_a_pipe() {
        let (pa, pb) = duplex_pair();
        let mut a = Communicant::new(pa, false);
        let mut b = Communicant::new(pb, true);

        a.send_u32(0xdead_beef).unwrap();
        assert_eq!(b.recv_u32().unwrap(), 0xdead_beef);
        assert_eq!(a.xmit_bytes(), 4);
        assert_eq!(b.recv_bytes(), 4);

        let v = BigUint::from(123456789u64);
        a.send_bigint(&v).unwrap();
        assert_eq!(b.recv_bigint().unwrap(), v);

        let elems = vec![Element::new(vec![1, 2]), Element::new(vec![3, 4, 5])];
        a.send_element_list(&elems).unwrap();
        let got = b.recv_element_list().unwrap();
        assert_eq!(got.len(), elems.len());
        for (g, w) in got.iter().zip(elems.iter()) {
            assert_eq!(g, w);
        }
    }

    #[test]
    fn cuckoo_row_packing_roundtrips_at_odd_widths() {
        for fingerprint_bits in [3u32, 5, 9, 16] {
            let max = if fingerprint_bits >= 16 { u16::MAX } else { ((1u32 << fingerprint_bits) - 1) as u16 };
            let row: Vec<u16> = vec![1, max, max / 2, 0];
            let packed = pack_row(&row, fingerprint_bits);
            assert_eq!(packed.len(), (row.len() * fingerprint_bits as usize + 7) / 8);
            let unpacked = unpack_row(&packed, row.len(), fingerprint_bits);
            assert_eq!(unpacked, row);
        }
    }

    #[test]
    fn cuckoo_filter_roundtrips_over_a_pipe_with_new_header_order() {
        let (pa, pb) = duplex_pair();
        let mut a = Communicant::new(pa, false);
        let mut b = Communicant::new(pb, true);

        let filter = crate::cuckoo::CuckooFilter::from_rows(9, 500, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
        a.send_cuckoo(&filter).unwrap();
        let got = b.recv_cuckoo(500).unwrap();
        assert_eq!(got.fingerprint_bits(), filter.fingerprint_bits());
        assert_eq!(got.bucket_size(), filter.bucket_size());
        assert_eq!(got.num_buckets(), filter.num_buckets());
        assert_eq!(got.rows(), filter.rows());
    }

    #[test]
    fn modulus_handshake_matches() {
        let (pa, pb) = duplex_pair();
        let mut a = Communicant::new(pa, false);
        let mut b = Communicant::new(pb, true);
        a.comm_connect();
        a.mark_connected();
        b.comm_listen();
        b.mark_connected();

        let p = BigUint::from(65537u32);
        let handle = std::thread::spawn(move || a.establish_modulus(&p.clone()).map(|_| ()));
        let p = BigUint::from(65537u32);
        let b_res = b.establish_modulus(&p);
        let a_res = handle.join().unwrap();
        assert!(a_res.is_ok());
        assert_eq!(b_res.unwrap(), p);
    }

    #[test]
    fn modulus_handshake_mismatch_is_sync_setup_failure() {
        let (pa, pb) = duplex_pair();
        let mut a = Communicant::new(pa, false);
        let mut b = Communicant::new(pb, true);
        a.comm_connect();
        a.mark_connected();
        b.comm_listen();
        b.mark_connected();

        let p_a = BigUint::from(65537u32);
        let p_b = BigUint::from(97u32);
        let handle = std::thread::spawn(move || a.establish_modulus(&p_a));
        let b_res = b.establish_modulus(&p_b);
        let a_res = handle.join().unwrap();
        assert!(matches!(a_res, Err(SyncError::SyncSetupFailure(_))));
        assert!(matches!(b_res, Err(SyncError::SyncSetupFailure(_))));
    }

    #[test]
    fn closing_on_empty_pipe_reports_channel_closed() {
        let (pa, _pb) = duplex_pair();
        let mut a = Communicant::new(pa, false);
        let err = a.recv_u32().unwrap_err();
        assert!(matches!(err, SyncError::ChannelClosed));
    }
}
