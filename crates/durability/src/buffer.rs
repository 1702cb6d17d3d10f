//! Growable typed byte buffer.
//!
//! Each execution unit serializes its records into one [`TypedByteBuffer`].
//! The buffer knows nothing about files: it is handed to the collective I/O
//! layer as a byte slice at synchronization points and then cleared.
//!
//! # Layout
//!
//! Typed values are written little-endian with fixed width and no padding,
//! so a reader needs only the record layout described in the file header.

use byteorder::{ByteOrder, LittleEndian};
use std::io;

/// Smallest capacity the buffer grows to.
pub const MIN_CAPACITY: usize = 64;

/// Buffer errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Growing the buffer failed, even after retrying at the exact size.
    #[error("Allocation of {requested} bytes failed (capacity {capacity})")]
    Allocation {
        /// Capacity that could not be allocated
        requested: usize,
        /// Capacity at the time of the failure
        capacity: usize,
    },
}

/// Fixed-width value with a stable little-endian encoding.
pub trait Scalar: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode into `out`, which is exactly `WIDTH` bytes long.
    fn encode(self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `WIDTH` bytes long.
    fn decode(bytes: &[u8]) -> Self;
}

impl Scalar for u8 {
    const WIDTH: usize = 1;

    fn encode(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

macro_rules! impl_scalar {
    ($ty:ty, $width:expr, $write:ident, $read:ident) => {
        impl Scalar for $ty {
            const WIDTH: usize = $width;

            fn encode(self, out: &mut [u8]) {
                LittleEndian::$write(out, self);
            }

            fn decode(bytes: &[u8]) -> Self {
                LittleEndian::$read(bytes)
            }
        }
    };
}

impl_scalar!(u16, 2, write_u16, read_u16);
impl_scalar!(u32, 4, write_u32, read_u32);
impl_scalar!(u64, 8, write_u64, read_u64);
impl_scalar!(i32, 4, write_i32, read_i32);
impl_scalar!(i64, 8, write_i64, read_i64);
impl_scalar!(f32, 4, write_f32, read_f32);
impl_scalar!(f64, 8, write_f64, read_f64);

/// Growable, append-only byte buffer.
///
/// `capacity` is the logical capacity: the backing storage is always fully
/// initialized up to it, and `size() <= capacity()` holds at all times.
#[derive(Debug, Default, Clone)]
pub struct TypedByteBuffer {
    /// Backing storage, `storage.len()` is the capacity
    storage: Vec<u8>,

    /// Current write offset
    ptr: usize,
}

impl TypedByteBuffer {
    /// Create an empty buffer without storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    /// Grow capacity to at least `size` bytes. Never shrinks.
    pub fn reserve(&mut self, size: usize) -> Result<(), BufferError> {
        if size <= self.capacity() {
            return Ok(());
        }
        self.grow_to(size)
    }

    /// Guarantee at least `size` free bytes for the next write.
    ///
    /// Grows by doubling (with a floor of [`MIN_CAPACITY`]) or to exactly
    /// the requirement when that is larger. If the doubled allocation fails,
    /// one retry is made at the exact required size.
    pub fn ensure_space(&mut self, size: usize) -> Result<(), BufferError> {
        if size <= self.free() {
            return Ok(());
        }

        let required = self.ptr.checked_add(size).ok_or(BufferError::Allocation {
            requested: usize::MAX,
            capacity: self.capacity(),
        })?;
        let doubled = self.capacity().saturating_mul(2).max(MIN_CAPACITY);
        let target = doubled.max(required);

        match self.grow_to(target) {
            Ok(()) => Ok(()),
            Err(_) if target > required => self.grow_to(required),
            Err(e) => Err(e),
        }
    }

    /// Append raw bytes.
    ///
    /// On allocation failure the buffer is left untouched.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure_space(bytes.len())?;
        self.storage[self.ptr..self.ptr + bytes.len()].copy_from_slice(bytes);
        self.ptr += bytes.len();
        Ok(())
    }

    /// Append one typed value.
    pub fn append<T: Scalar>(&mut self, value: T) -> Result<&mut Self, BufferError> {
        self.ensure_space(T::WIDTH)?;
        value.encode(&mut self.storage[self.ptr..self.ptr + T::WIDTH]);
        self.ptr += T::WIDTH;
        Ok(self)
    }

    /// Append a slice of typed values.
    pub fn append_slice<T: Scalar>(&mut self, values: &[T]) -> Result<&mut Self, BufferError> {
        let len = values.len().checked_mul(T::WIDTH).ok_or(BufferError::Allocation {
            requested: usize::MAX,
            capacity: self.capacity(),
        })?;
        self.ensure_space(len)?;
        for value in values {
            value.encode(&mut self.storage[self.ptr..self.ptr + T::WIDTH]);
            self.ptr += T::WIDTH;
        }
        Ok(self)
    }

    /// Logical reset. Keeps the allocated storage.
    pub fn clear(&mut self) {
        self.ptr = 0;
    }

    /// Bytes written since the last clear.
    pub fn size(&self) -> usize {
        self.ptr
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Free bytes before the next growth.
    pub fn free(&self) -> usize {
        self.capacity() - self.ptr
    }

    /// Whether nothing was written since the last clear.
    pub fn is_empty(&self) -> bool {
        self.ptr == 0
    }

    /// The written bytes, in append order.
    pub fn read(&self) -> &[u8] {
        &self.storage[..self.ptr]
    }

    fn grow_to(&mut self, target: usize) -> Result<(), BufferError> {
        let additional = target - self.storage.len();
        self.storage
            .try_reserve_exact(additional)
            .map_err(|_| BufferError::Allocation {
                requested: target,
                capacity: self.storage.len(),
            })?;
        self.storage.resize(target, 0);
        Ok(())
    }
}

impl io::Write for TypedByteBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TypedByteBuffer::write(self, buf)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
