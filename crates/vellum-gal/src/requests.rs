//! Requests from background threads.
//!
//! A [`Device`](crate::Device) is bound to the thread that created it.
//! Streaming or loading threads get a [`DeviceRequests`] sender instead and
//! the device applies what they sent at the next `begin_frame`, `wait_idle`
//! or `process_requests`.

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{GpuError, Result};
use crate::resources::{BufferHandle, SamplerStateHandle, TextureHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    DestroyTexture(TextureHandle),
    DestroyBuffer(BufferHandle),
    DestroySamplerState(SamplerStateHandle),
    UpdateBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
}

/// Cloneable, `Send` handle for queuing work on the device thread.
#[derive(Debug, Clone)]
pub struct DeviceRequests {
    sender: Sender<DeviceRequest>,
}

impl DeviceRequests {
    pub fn send(&self, request: DeviceRequest) -> Result<()> {
        self.sender
            .send(request)
            .map_err(|_| GpuError::invalid_state("device is gone"))
    }

    pub fn destroy_texture(&self, texture: TextureHandle) -> Result<()> {
        self.send(DeviceRequest::DestroyTexture(texture))
    }

    pub fn destroy_buffer(&self, buffer: BufferHandle) -> Result<()> {
        self.send(DeviceRequest::DestroyBuffer(buffer))
    }

    pub fn destroy_sampler_state(&self, sampler: SamplerStateHandle) -> Result<()> {
        self.send(DeviceRequest::DestroySamplerState(sampler))
    }

    pub fn update_buffer(&self, buffer: BufferHandle, offset: u64, data: Vec<u8>) -> Result<()> {
        self.send(DeviceRequest::UpdateBuffer {
            buffer,
            offset,
            data,
        })
    }
}

pub(crate) fn request_channel() -> (DeviceRequests, Receiver<DeviceRequest>) {
    let (sender, receiver) = channel::unbounded();
    (DeviceRequests { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ArenaHandle;

    #[test]
    fn requests_arrive_in_order_from_other_threads() {
        let (requests, receiver) = request_channel();
        let texture = TextureHandle::from_parts(3, 1);

        let remote = requests.clone();
        std::thread::spawn(move || {
            remote.destroy_texture(texture).unwrap();
            remote.update_buffer(BufferHandle::from_parts(0, 0), 4, vec![1, 2]).unwrap();
        })
        .join()
        .unwrap();

        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], DeviceRequest::DestroyTexture(texture));
    }

    #[test]
    fn sending_after_device_drop_fails() {
        let (requests, receiver) = request_channel();
        drop(receiver);
        assert!(matches!(
            requests.destroy_buffer(BufferHandle::from_parts(0, 0)),
            Err(GpuError::InvalidState(_))
        ));
    }
}
