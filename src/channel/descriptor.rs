//! Zero-copy descriptor channels (§4.8): a `Channel<Descriptor>` whose
//! sends are checked against an optional strict format policy and whose
//! backend is notified of every transfer via the thin [`BackendState`]
//! hooks. The generic send/recv path in [`super`] already does the
//! actual hand-off/buffering; this module only adds the attach step and
//! the format-policy gate at send time.

use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::zerocopy::{lookup_backend, BackendOptions, Capabilities, Descriptor, FormatPolicy};

use super::{new_inner, ChannelKind, Receiver, Sender};

/// Open a zero-copy channel bound to the named backend (the in-tree
/// "zref" backend is always available). Sets `ZERO_COPY` and
/// `POINTER_DESCRIPTOR` on every descriptor it carries from here on.
pub fn descriptor_channel(
    kind: ChannelKind,
    backend_name: &str,
    opts: BackendOptions,
) -> Result<(Sender<Descriptor>, Receiver<Descriptor>)> {
    let backend = lookup_backend(backend_name)?;
    let strict_format = opts.strict_format;
    let policy = opts.policy;
    let state = backend.attach(&opts);

    let cancel_slice_ms = crate::scheduler::default().config().cancel_slice_ms;
    let inner = new_inner(
        kind,
        Capabilities::ZERO_COPY | Capabilities::POINTER_DESCRIPTOR,
        Some(state),
        policy,
        strict_format,
        cancel_slice_ms,
    );
    Ok((Sender(Arc::clone(&inner)), Receiver(inner)))
}

impl Sender<Descriptor> {
    pub fn send_descriptor(&self, descriptor: Descriptor) -> Result<()> {
        self.send_descriptor_c(descriptor, -1, None)
    }

    pub fn try_send_descriptor(&self, descriptor: Descriptor) -> Result<()> {
        self.send_descriptor_c(descriptor, 0, None)
    }

    /// Like [`super::Sender::send_c`], but checks the descriptor's
    /// region format against this channel's policy first when the
    /// backend was attached in strict mode.
    pub fn send_descriptor_c(
        &self,
        descriptor: Descriptor,
        timeout_ms: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.check_format(&descriptor)?;
        self.send_c(descriptor, timeout_ms, cancel)
    }

    fn check_format(&self, descriptor: &Descriptor) -> Result<()> {
        if !self.0.strict_format {
            return Ok(());
        }
        let expected = match &self.0.format_policy {
            Some(p) => p,
            None => return Ok(()),
        };
        let metadata = crate::zerocopy::region_metadata(descriptor.region_id).ok_or(Error::Invalid)?;
        let actual = FormatPolicy {
            dtype: metadata.dtype,
            elem_bits: metadata.elem_bits,
            alignment: metadata.alignment,
            stride: metadata.stride,
            dims: metadata.dims.len() as u32,
        };
        if expected.matches(&actual) {
            Ok(())
        } else {
            Err(Error::Invalid)
        }
    }
}

impl Receiver<Descriptor> {
    pub fn recv_descriptor(&self) -> Result<Descriptor> {
        self.recv_c(-1, None)
    }

    pub fn try_recv_descriptor(&self) -> Result<Descriptor> {
        self.recv_c(0, None)
    }

    pub fn recv_descriptor_c(
        &self,
        timeout_ms: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<Descriptor> {
        self.recv_c(timeout_ms, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zerocopy::{region_register, FormatPolicy};

    #[test]
    fn descriptor_channel_round_trips_without_a_policy() {
        let (tx, rx) = descriptor_channel(ChannelKind::Rendezvous, "zref", BackendOptions::default())
            .unwrap();
        let region = region_register(0x1000, 4096, None);
        let d = Descriptor {
            addr: 0x1000,
            len: 64,
            region_id: region,
            offset: 0,
            flags: 0,
        };
        let handle = std::thread::spawn(move || rx.recv_descriptor().unwrap());
        tx.send_descriptor(d).unwrap();
        assert_eq!(handle.join().unwrap(), d);
    }

    #[test]
    fn strict_mode_rejects_a_region_whose_metadata_mismatches() {
        let policy = FormatPolicy {
            dtype: 1,
            elem_bits: 32,
            alignment: 4,
            stride: 4,
            dims: 1,
        };
        let opts = BackendOptions {
            strict_format: true,
            policy: Some(policy),
        };
        let (tx, _rx) = descriptor_channel(ChannelKind::Buffered(1), "zref", opts).unwrap();
        let region = region_register(0x2000, 4096, None); // default metadata, doesn't match
        let d = Descriptor {
            addr: 0x2000,
            len: 64,
            region_id: region,
            offset: 0,
            flags: 0,
        };
        assert_eq!(tx.try_send_descriptor(d), Err(Error::Invalid));
    }

    #[test]
    fn zero_copy_capability_bits_are_set() {
        let (tx, _rx) =
            descriptor_channel(ChannelKind::Buffered(1), "zref", BackendOptions::default()).unwrap();
        let snap = tx.snapshot();
        assert!(snap.zref_mode);
        assert!(snap.ptr_mode);
    }
}
