//! Macros for deriving asset traits.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput};

const DEPENDENCY_ATTRIBUTE: &str = "dependency";

/// Implement `Asset` and `VisitAssetDependencies`. Fields annotated with
/// `#[dependency]` are visited as asset dependencies.
#[proc_macro_derive(Asset, attributes(dependency))]
pub fn derive_asset(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    let visitor = dependency_visitor_body(&ast);
    TokenStream::from(quote! {
        impl #impl_generics verse_asset::Asset for #name #type_generics #where_clause {}
        impl #impl_generics verse_asset::VisitAssetDependencies for #name #type_generics #where_clause {
            fn visit_dependencies(&self, visit: &mut dyn FnMut(verse_asset::UntypedAssetId)) {
                #visitor
            }
        }
    })
}

/// Implement only `VisitAssetDependencies`.
#[proc_macro_derive(VisitAssetDependencies, attributes(dependency))]
pub fn derive_visit_asset_dependencies(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();
    let visitor = dependency_visitor_body(&ast);
    TokenStream::from(quote! {
        impl #impl_generics verse_asset::VisitAssetDependencies for #name #type_generics #where_clause {
            fn visit_dependencies(&self, visit: &mut dyn FnMut(verse_asset::UntypedAssetId)) {
                #visitor
            }
        }
    })
}

fn dependency_visitor_body(ast: &DeriveInput) -> proc_macro2::TokenStream {
    let mut visits = Vec::new();
    if let Data::Struct(data) = &ast.data {
        for (index, field) in data.fields.iter().enumerate() {
            let is_dependency = field
                .attrs
                .iter()
                .any(|attr| attr.path().is_ident(DEPENDENCY_ATTRIBUTE));
            if !is_dependency {
                continue;
            }
            let member = match &field.ident {
                Some(ident) => quote!(self.#ident),
                None => {
                    let index = syn::Index::from(index);
                    quote!(self.#index)
                }
            };
            visits.push(quote! {
                verse_asset::VisitAssetDependencies::visit_dependencies(&#member, visit);
            });
        }
    }
    quote! {
        let _ = &visit;
        #(#visits)*
    }
}
