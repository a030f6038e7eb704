//! Precondition validators
//!
//! Pure decision functions run before the universe lock is taken. They never
//! write state; the only outside reads go through [`InstanceCatalog`] and
//! [`CertificateRegistry`].

mod resize;
mod tls;

pub use resize::{
    check_resize_is_possible, verify_resize_params, InstanceCatalog, InstanceType,
    StaticInstanceCatalog,
};
pub use tls::{verify_tls_toggle, CertificateRegistry, StaticCertificateRegistry};

#[cfg(test)]
pub use resize::MockInstanceCatalog;
#[cfg(test)]
pub use tls::MockCertificateRegistry;
