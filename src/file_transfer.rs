//! C8: file-transfer overlay — fragments a file across repeated poll
//! cycles (spec §4.8).
//!
//! Layered on the ordinary command/reply cycle: [`crate::pd_model::FileTransferState`]
//! tracks how much of the file has gone out (or been received) and this
//! module yields/consumes one chunk per tick, never suppressing POLL for
//! the whole transfer. The backing store itself is an external
//! collaborator — [`FileOps`] — exactly like [`crate::channel::Channel`]
//! is for the transport. Direction is implicit in which entry point the
//! caller drives: [`Cp`](crate::cp::Cp) calls `start_send`/`read_next_chunk`/
//! `advance_sent`, [`Pd`](crate::pd::Pd) calls `start_receive`/`write_chunk`.

use crate::config::FILE_FRAGMENT_MAX;
use crate::error::Error;
use crate::pd_model::FileTransferState;

/// Backing store for file-transfer content, supplied by the host
/// application (spec §6 "File interface").
pub trait FileOps {
	/// Opens `file_id` for this transfer, returning its total size.
	fn open(&mut self, file_id: u8) -> Result<u32, Error>;

	/// Reads up to `buf.len()` bytes starting at `offset`, returning how
	/// many were read.
	fn read(&mut self, buf: &mut [u8], offset: u32) -> Result<usize, Error>;

	/// Writes `buf` at `offset`.
	fn write(&mut self, buf: &[u8], offset: u32) -> Result<usize, Error>;

	/// Closes the file, ending the transfer.
	fn close(&mut self) -> Result<(), Error>;
}

/// Opens `file_id` on `store` and starts a sender-side transfer.
pub fn start_send(store: &mut impl FileOps, file_id: u8) -> Result<FileTransferState, Error> {
	let total_size = store.open(file_id)?;
	Ok(FileTransferState {
		active: true,
		file_id,
		total_size,
		offset: 0,
		cancelled: false,
	})
}

/// Starts a receiver-side transfer for an announced `file_id`/`total_size`
/// (spec §4.8: "Initiation opens the backing store via
/// `file_ops.open(file_id) -> size`").
pub fn start_receive(store: &mut impl FileOps, file_id: u8, total_size: u32) -> Result<FileTransferState, Error> {
	let _ = store.open(file_id)?;
	Ok(FileTransferState {
		active: true,
		file_id,
		total_size,
		offset: 0,
		cancelled: false,
	})
}

/// One sender-side tick: reads `min(FILE_FRAGMENT_MAX, remaining)` bytes
/// from `store` at the cursor's offset into `out`, returning the chunk
/// length. Does not advance `offset` — the caller advances it once the
/// chunk has actually been sent and acknowledged (so a dropped reply can
/// be retransmitted without re-reading).
pub fn read_next_chunk(state: &FileTransferState, store: &mut impl FileOps, out: &mut [u8]) -> Result<usize, Error> {
	let chunk_len = (state.remaining() as usize).min(FILE_FRAGMENT_MAX).min(out.len());
	if chunk_len == 0 {
		return Ok(0);
	}
	store.read(&mut out[..chunk_len], state.offset)
}

/// Advances a sender cursor after its current chunk was acknowledged.
pub fn advance_sent(state: &mut FileTransferState, chunk_len: usize) {
	state.offset = state.offset.saturating_add(chunk_len as u32);
}

/// One receiver-side tick: writes `chunk` to `store` at `offset`, then
/// advances the cursor by the written length (spec §4.8: "the receiver
/// writes it and replies with its new offset").
pub fn write_chunk(state: &mut FileTransferState, store: &mut impl FileOps, offset: u32, chunk: &[u8]) -> Result<(), Error> {
	if offset != state.offset {
		return Err(Error::RecordInvalid);
	}
	let written = store.write(chunk, offset)?;
	state.offset = state.offset.saturating_add(written as u32);
	Ok(())
}

/// Marks a cursor cancelled (spec §4.8 "A cancel flag on the initiating
/// command aborts mid-stream") and closes the backing store.
pub fn cancel(state: &mut FileTransferState, store: &mut impl FileOps) -> Result<(), Error> {
	state.cancelled = true;
	store.close()
}

/// Closes the backing store once [`FileTransferState::done`] is true.
pub fn finish(store: &mut impl FileOps) -> Result<(), Error> {
	store.close()
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use heapless::Vec;

	/// An in-memory file store, standing in for a real filesystem in
	/// tests.
	pub struct MemoryFile {
		pub contents: Vec<u8, 16384>,
		pub closed: bool,
	}

	impl MemoryFile {
		pub fn new(contents: &[u8]) -> Self {
			let mut v = Vec::new();
			v.extend_from_slice(contents).unwrap();
			Self { contents: v, closed: false }
		}

		pub fn empty_of_size(size: usize) -> Self {
			let mut v = Vec::new();
			v.resize(size, 0).unwrap();
			Self { contents: v, closed: false }
		}
	}

	impl FileOps for MemoryFile {
		fn open(&mut self, _file_id: u8) -> Result<u32, Error> {
			Ok(self.contents.len() as u32)
		}

		fn read(&mut self, buf: &mut [u8], offset: u32) -> Result<usize, Error> {
			let offset = offset as usize;
			if offset > self.contents.len() {
				return Err(Error::FileIo);
			}
			let n = buf.len().min(self.contents.len() - offset);
			buf[..n].copy_from_slice(&self.contents[offset..offset + n]);
			Ok(n)
		}

		fn write(&mut self, buf: &[u8], offset: u32) -> Result<usize, Error> {
			let offset = offset as usize;
			if offset + buf.len() > self.contents.len() {
				return Err(Error::FileIo);
			}
			self.contents[offset..offset + buf.len()].copy_from_slice(buf);
			Ok(buf.len())
		}

		fn close(&mut self) -> Result<(), Error> {
			self.closed = true;
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::test_support::MemoryFile;
	use super::*;

	#[test]
	fn full_transfer_copies_bytes_exactly() {
		let source: heapless::Vec<u8, 16384> = {
			let mut v = heapless::Vec::new();
			for i in 0..10_000u32 {
				v.push((i % 256) as u8).unwrap();
			}
			v
		};
		let mut sender_store = MemoryFile::new(&source);
		let mut receiver_store = MemoryFile::empty_of_size(10_000);

		let mut tx = start_send(&mut sender_store, 7).unwrap();
		let mut rx = start_receive(&mut receiver_store, 7, tx.total_size).unwrap();

		let mut chunk = [0u8; 128];
		while !tx.done() {
			let n = read_next_chunk(&tx, &mut sender_store, &mut chunk).unwrap();
			write_chunk(&mut rx, &mut receiver_store, tx.offset, &chunk[..n]).unwrap();
			advance_sent(&mut tx, n);
		}

		assert_eq!(tx.offset, 10_000);
		assert_eq!(rx.offset, 10_000);
		assert_eq!(tx.remaining(), 0);
		assert_eq!(receiver_store.contents.as_slice(), source.as_slice());
	}

	#[test]
	fn cancel_marks_done_without_completing() {
		let mut store = MemoryFile::new(&[0u8; 100]);
		let mut state = start_send(&mut store, 1).unwrap();
		cancel(&mut state, &mut store).unwrap();
		assert!(state.done());
		assert!(store.closed);
	}

	#[test]
	fn write_chunk_rejects_out_of_order_offset() {
		let mut store = MemoryFile::empty_of_size(100);
		let mut state = start_receive(&mut store, 1, 100).unwrap();
		let result = write_chunk(&mut state, &mut store, 16, &[1, 2, 3]);
		assert!(matches!(result, Err(Error::RecordInvalid)));
	}
}
