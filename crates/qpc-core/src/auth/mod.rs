mod device;
mod error;

pub use device::{
    AuthorizationRequest, DeviceAuthFlow, SSO_CLIENT_ID, SSO_REALM, SSO_SCOPE,
};
pub use error::AuthError;
