//! Handlers with nothing to synchronize yet.

use super::{Handler, HandlerConfig, HandlerError, Permission};

macro_rules! passive_handler {
    ($(#[$meta:meta])* $ty:ident, $component:literal) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $ty {
            name: String,
            priority: i64,
        }

        impl $ty {
            pub fn new(name: &str, config: &HandlerConfig) -> Self {
                Self {
                    name: name.to_string(),
                    priority: config.priority,
                }
            }
        }

        impl Handler for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn priority(&self) -> i64 {
                self.priority
            }

            fn user_created(&self, user: &str) -> Result<(), HandlerError> {
                crate::debug_event!($component, "user created", "{user}");
                Ok(())
            }

            fn user_deleted(&self, user: &str) -> Result<(), HandlerError> {
                crate::debug_event!($component, "user deleted", "{user}");
                Ok(())
            }

            fn permission_created(&self, permission: &Permission) -> Result<(), HandlerError> {
                crate::debug_event!($component, "permission created", "{permission}");
                Ok(())
            }

            fn permission_deleted(&self, permission: &Permission) -> Result<(), HandlerError> {
                crate::debug_event!($component, "permission deleted", "{permission}");
                Ok(())
            }
        }
    };
}

passive_handler!(
    /// Reverse proxy in front of the services.
    Nginx,
    "nginx"
);

passive_handler!(
    /// THREDDS data server.
    Thredds,
    "thredds"
);
