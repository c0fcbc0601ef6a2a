/// Configuration macros for zero-repetition config definitions
///
/// `config_struct!` defines a configuration structure with its defaults in a
/// single declaration.

/// Define a configuration struct with embedded defaults
///
/// Each field carries its name, type and default value in one place. The macro
/// generates:
/// - The struct with public fields
/// - The Default implementation
/// - Serde support with `#[serde(default)]`, so partial TOML files load
///
/// # Example
/// ```
/// fleetlink::config_struct! {
///     pub struct HubConfig {
///         delivery_timeout_ms: u64 = 1_000,
///         subscriber_queue_size: usize = 256,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
