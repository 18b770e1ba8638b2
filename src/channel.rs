//! C1: the byte transport the engine is driven over.
//!
//! This crate never opens a socket or configures a UART. It asks the host
//! application for a [`Channel`] implementation and drives it from
//! `refresh()`; all three methods must be non-blocking, matching the
//! original's `osdp_read_fn_t`/`osdp_write_fn_t`/`osdp_flush_fn_t` contract.

use crate::error::Error;

/// Identifies a shared transport on a multi-drop (RS-485) bus.
///
/// PDs that share a wire carry the same `ChannelId` so the CP never issues
/// overlapping transactions on it. A PD on its own dedicated link can leave
/// this unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u32);

/// Non-blocking byte transport.
///
/// `recv`/`send`/`flush` must never block. `recv` returning `Ok(0)` is the
/// steady "nothing available yet" state, not an error. `send` is
/// all-or-nothing: implementations must either write every byte of `buf` or
/// return `Err(Error::Transport)` — a short write is not distinguishable
/// from an error at this layer, exactly as the original documents for
/// `osdp_write_fn_t`.
pub trait Channel {
	/// Copies at most `buf.len()` available bytes into `buf`, returning how
	/// many were copied. Returns `Ok(0)` when nothing is available.
	fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

	/// Writes all of `buf` to the channel, or fails. Never partial.
	fn send(&mut self, buf: &[u8]) -> Result<usize, Error>;

	/// Drops any buffered bytes in the channel's TX/RX path. Optional;
	/// the default implementation is a no-op for channels with no FIFO to
	/// flush.
	fn flush(&mut self) -> Result<(), Error> {
		Ok(())
	}

	/// The shared-bus identifier for this channel. PDs wired to the same
	/// physical bus must report the same id.
	fn id(&self) -> ChannelId;
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use heapless::Deque;

	/// An in-memory loopback channel pair, used by unit/integration tests
	/// in place of a real serial link.
	pub struct LoopbackChannel {
		pub inbox: Deque<u8, 512>,
		pub outbox: Deque<u8, 512>,
		id: ChannelId,
	}

	impl LoopbackChannel {
		pub fn new(id: u32) -> Self {
			Self {
				inbox: Deque::new(),
				outbox: Deque::new(),
				id: ChannelId(id),
			}
		}

		pub fn deliver(&mut self, bytes: &[u8]) {
			for &b in bytes {
				let _ = self.inbox.push_back(b);
			}
		}

		pub fn drain_sent(&mut self) -> heapless::Vec<u8, 512> {
			let mut out = heapless::Vec::new();
			while let Some(b) = self.outbox.pop_front() {
				let _ = out.push(b);
			}
			out
		}
	}

	impl Channel for LoopbackChannel {
		fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
			let mut n = 0;
			while n < buf.len() {
				match self.inbox.pop_front() {
					Some(b) => {
						buf[n] = b;
						n += 1;
					}
					None => break,
				}
			}
			Ok(n)
		}

		fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
			for &b in buf {
				self.outbox.push_back(b).map_err(|_| Error::Transport)?;
			}
			Ok(buf.len())
		}

		fn id(&self) -> ChannelId {
			self.id
		}
	}
}

#[cfg(test)]
mod tests {
	use super::test_support::LoopbackChannel;
	use super::*;

	#[test]
	fn recv_returns_zero_when_empty() {
		let mut ch = LoopbackChannel::new(1);
		let mut buf = [0u8; 8];
		assert_eq!(ch.recv(&mut buf).unwrap(), 0);
	}

	#[test]
	fn send_then_drain_round_trips() {
		let mut ch = LoopbackChannel::new(1);
		ch.send(&[1, 2, 3]).unwrap();
		assert_eq!(ch.drain_sent().as_slice(), &[1, 2, 3]);
	}

	#[test]
	fn deliver_then_recv_round_trips() {
		let mut ch = LoopbackChannel::new(1);
		ch.deliver(&[9, 8, 7]);
		let mut buf = [0u8; 8];
		let n = ch.recv(&mut buf).unwrap();
		assert_eq!(&buf[..n], &[9, 8, 7]);
	}
}
