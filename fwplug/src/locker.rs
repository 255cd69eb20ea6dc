//! Scoped open/close guard.
//!
//! A [`DeviceLocker`] opens a resource when it is created and closes it when
//! it goes out of scope, so a transport is released on every exit path.
//! Calling [`DeviceLocker::close`] explicitly surfaces the close error; a
//! close triggered by drop can only log it.

use {
    crate::error::Result,
    log::warn,
    std::ops::{Deref, DerefMut},
};

/// A resource with an explicit open/close lifecycle.
pub trait Lockable {
    /// Acquire the resource.
    fn open(&mut self) -> Result<()>;

    /// Release the resource.
    fn close(&mut self) -> Result<()>;
}

/// Guard that keeps a [`Lockable`] open for its lifetime.
pub struct DeviceLocker<'a, T: Lockable + ?Sized> {
    inner: &'a mut T,
    open: bool,
}

impl<'a, T: Lockable + ?Sized> DeviceLocker<'a, T> {
    /// Open `inner` and guard it.
    pub fn new(inner: &'a mut T) -> Result<Self> {
        inner.open()?;
        Ok(Self { inner, open: true })
    }

    /// Close the resource now and report the outcome.
    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.inner
            .close()
    }
}

impl<T: Lockable + ?Sized> Deref for DeviceLocker<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner
    }
}

impl<T: Lockable + ?Sized> DerefMut for DeviceLocker<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
    }
}

impl<T: Lockable + ?Sized> Drop for DeviceLocker<'_, T> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self
                .inner
                .close()
            {
                warn!("failed to close device: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::error::Error};

    #[derive(Default)]
    struct Counter {
        opens: usize,
        closes: usize,
        fail_open: bool,
        fail_close: bool,
    }

    impl Lockable for Counter {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(Error::Protocol("open".into()));
            }
            self.opens += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            if self.fail_close {
                return Err(Error::Protocol("close".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_drop_closes_once() {
        let mut dev = Counter::default();
        {
            let _locker = DeviceLocker::new(&mut dev).unwrap();
        }
        assert_eq!(dev.opens, 1);
        assert_eq!(dev.closes, 1);
    }

    #[test]
    fn test_explicit_close_surfaces_error() {
        let mut dev = Counter {
            fail_close: true,
            ..Default::default()
        };
        let locker = DeviceLocker::new(&mut dev).unwrap();
        assert!(locker.close().is_err());
        assert_eq!(dev.closes, 1);
    }

    #[test]
    fn test_failed_open_does_not_close() {
        let mut dev = Counter {
            fail_open: true,
            ..Default::default()
        };
        assert!(DeviceLocker::new(&mut dev).is_err());
        assert_eq!(dev.closes, 0);
    }

    #[test]
    fn test_closes_on_early_return() {
        fn work(dev: &mut Counter) -> Result<()> {
            let _locker = DeviceLocker::new(dev)?;
            Err(Error::Protocol("write failed".into()))
        }

        let mut dev = Counter::default();
        assert!(work(&mut dev).is_err());
        assert_eq!(dev.closes, 1);
    }
}
