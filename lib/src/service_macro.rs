//! Service-table registration macro.
//!
//! The kernel's external collaborators (scheduler, memory manager,
//! filesystem, platform, architecture layer) are reached through
//! function tables wired once during boot. `define_service!` generates
//! the table struct, a one-shot registration function, a panicking
//! accessor, a wired-probe, and a call-through wrapper per entry:
//!
//! ```ignore
//! crate::define_service! {
//!     platform => PlatformServices {
//!         timer_ticks() -> u64;
//!         irq_restore(flags: u64);
//!     }
//! }
//!
//! // generated surface:
//! platform::register_platform_services(&TABLE);
//! platform::timer_ticks();
//! platform::platform_services_wired();
//! ```
//!
//! Calling through an unwired table is a boot-ordering bug and panics.

#[macro_export]
macro_rules! define_service {
    ($name:ident => $service:ident {
        $( $(#[$meta:meta])* $fn_name:ident ( $($arg:ident : $arg_ty:ty),* $(,)? ) $(-> $ret:ty)? ; )*
    }) => {
        $crate::paste::paste! {
            /// Function table provided by the collaborating subsystem.
            pub struct $service {
                $( $(#[$meta])* pub $fn_name: fn($($arg_ty),*) $(-> $ret)?, )*
            }

            static [<$name:upper _SERVICES>]: $crate::spin::Once<&'static $service> =
                $crate::spin::Once::new();

            /// Wire the service table. One-shot; later calls are ignored.
            pub fn [<register_ $name _services>](services: &'static $service) {
                [<$name:upper _SERVICES>].call_once(|| services);
            }

            pub fn [<$name _services>]() -> &'static $service {
                [<$name:upper _SERVICES>]
                    .get()
                    .copied()
                    .unwrap_or_else(|| panic!(concat!(stringify!($name), " services not wired")))
            }

            pub fn [<$name _services_wired>]() -> bool {
                [<$name:upper _SERVICES>].is_completed()
            }

            $(
                $(#[$meta])*
                #[inline(always)]
                pub fn $fn_name($($arg: $arg_ty),*) $(-> $ret)? {
                    ([<$name _services>]().$fn_name)($($arg),*)
                }
            )*
        }
    };
}
