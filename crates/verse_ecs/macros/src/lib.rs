//! Macros for deriving ECS traits.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Implement the `Component` trait.
#[proc_macro_derive(Component)]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    TokenStream::from(quote! {
        impl #impl_generics verse_ecs::component::Component for #name #type_generics #where_clause {}
    })
}

/// Implement the `Resource` trait.
#[proc_macro_derive(Resource)]
pub fn derive_resource(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    TokenStream::from(quote! {
        impl #impl_generics verse_ecs::resource::Resource for #name #type_generics #where_clause {}
    })
}

/// Implement the `Event` trait.
#[proc_macro_derive(Event)]
pub fn derive_event(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    TokenStream::from(quote! {
        impl #impl_generics verse_ecs::event::Event for #name #type_generics #where_clause {}
    })
}

/// Implement the `ScheduleLabel` trait. The type must also derive `Debug`,
/// `Clone`, `PartialEq`, `Eq` and `Hash`.
#[proc_macro_derive(ScheduleLabel)]
pub fn derive_schedule_label(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    TokenStream::from(quote! {
        impl #impl_generics verse_ecs::schedule::ScheduleLabel for #name #type_generics #where_clause {
            fn dyn_clone(&self) -> ::std::boxed::Box<dyn verse_ecs::schedule::ScheduleLabel> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }
            fn as_dyn_eq(&self) -> &dyn verse_ecs::label::DynEq {
                self
            }
            fn dyn_hash(&self, mut state: &mut dyn ::std::hash::Hasher) {
                let ty_id = ::std::any::TypeId::of::<Self>();
                ::std::hash::Hash::hash(&ty_id, &mut state);
                ::std::hash::Hash::hash(self, &mut state);
            }
        }
    })
}

/// Implement the `SystemSet` trait. The type must also derive `Debug`,
/// `Clone`, `PartialEq`, `Eq` and `Hash`.
#[proc_macro_derive(SystemSet)]
pub fn derive_system_set(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    TokenStream::from(quote! {
        impl #impl_generics verse_ecs::schedule::SystemSet for #name #type_generics #where_clause {
            fn dyn_clone(&self) -> ::std::boxed::Box<dyn verse_ecs::schedule::SystemSet> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }
            fn as_dyn_eq(&self) -> &dyn verse_ecs::label::DynEq {
                self
            }
            fn dyn_hash(&self, mut state: &mut dyn ::std::hash::Hasher) {
                let ty_id = ::std::any::TypeId::of::<Self>();
                ::std::hash::Hash::hash(&ty_id, &mut state);
                ::std::hash::Hash::hash(self, &mut state);
            }
        }
    })
}
