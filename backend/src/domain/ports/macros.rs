//! Helper macro for declaring port error enums with snake_case constructors.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };

    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Constructor generation for port errors.
    use uuid::Uuid;

    define_port_error! {
        pub enum LedgerError {
            Closed => "ledger closed",
            Missing { entity: String, id: Uuid } => "{entity} {id} missing",
            Rejected { message: String, attempts: u32 } => "rejected after {attempts}: {message}",
        }
    }

    #[test]
    fn unit_variants_get_zero_argument_constructors() {
        assert_eq!(LedgerError::closed(), LedgerError::Closed);
        assert_eq!(LedgerError::closed().to_string(), "ledger closed");
    }

    #[test]
    fn string_fields_accept_borrowed_text() {
        let id = Uuid::nil();
        let err = LedgerError::missing("book", id);
        assert_eq!(err.to_string(), format!("book {id} missing"));
    }

    #[test]
    fn mixed_fields_keep_their_types() {
        let err = LedgerError::rejected("duplicate", 3_u32);
        assert_eq!(
            err,
            LedgerError::Rejected {
                message: "duplicate".to_owned(),
                attempts: 3
            }
        );
        assert_eq!(err.to_string(), "rejected after 3: duplicate");
    }
}
